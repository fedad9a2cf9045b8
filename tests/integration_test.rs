//! Integration tests for followback.
//!
//! These tests drive the library end to end:
//! - Reading export directories and zip files
//! - Analysis through the engine with durable storage
//! - Whitelist persistence across engine instances

use followback::{
    Engine, EngineOptions, EngineWarning, ListKind, RunOutcome, SortKey, Tier, archive,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FOLLOWERS_JSON: &str = r#"[
    {"title": "", "media_list_data": [], "string_list_data": [
        {"href": "https://www.instagram.com/alice", "value": "alice", "timestamp": 1650000000}
    ]},
    {"title": "", "media_list_data": [], "string_list_data": [
        {"href": "https://www.instagram.com/Bob", "value": "Bob", "timestamp": 1650000100}
    ]}
]"#;

const FOLLOWING_JSON: &str = r#"{"relationships_following": [
    {"title": "", "string_list_data": [
        {"href": "https://www.instagram.com/alice", "value": "alice", "timestamp": 1500000000}
    ]},
    {"title": "", "string_list_data": [
        {"href": "https://www.instagram.com/bob", "value": "bob", "timestamp": 1500000100}
    ]},
    {"title": "", "string_list_data": [
        {"href": "https://www.instagram.com/carol", "value": "carol", "timestamp": 1700000000}
    ]},
    {"title": "", "string_list_data": [
        {"href": "https://www.instagram.com/Dave", "value": "Dave", "timestamp": 1600000000}
    ]}
]}"#;

/// Create an Instagram-style export directory.
fn create_test_export(dir: &TempDir) -> PathBuf {
    let connections = dir.path().join("export/connections/followers_and_following");
    std::fs::create_dir_all(&connections).unwrap();
    std::fs::write(connections.join("followers_1.json"), FOLLOWERS_JSON).unwrap();
    std::fs::write(connections.join("following.json"), FOLLOWING_JSON).unwrap();
    std::fs::write(connections.join("recently_unfollowed_profiles.json"), "[]").unwrap();
    dir.path().join("export")
}

fn open_engine(db_path: &Path) -> Engine {
    followback::logging::init_test_logging();
    Engine::open(db_path, None, EngineOptions::default())
}

async fn analyze(engine: &Engine, export: &Path) -> followback::AnalysisReport {
    let documents = archive::read_archive(export).unwrap();
    match engine.run(async { documents }).await {
        RunOutcome::Accepted(report) => report,
        other => panic!("expected an accepted run, got {other:?}"),
    }
}

fn usernames(accounts: &[followback::Account]) -> Vec<&str> {
    accounts.iter().map(|a| a.username.as_str()).collect()
}

#[tokio::test]
async fn test_analyze_export_directory() {
    let temp = TempDir::new().unwrap();
    let export = create_test_export(&temp);
    let engine = open_engine(&temp.path().join("followback.db"));

    assert_eq!(engine.tier(), Tier::Durable);
    let report = analyze(&engine, &export).await;

    assert_eq!(report.documents, 2);
    assert!(report.warnings.is_empty());
    let stats = &report.result.stats;
    assert_eq!(stats.followers_count, 2);
    assert_eq!(stats.following_count, 4);
    assert_eq!(stats.not_following_back_count, 2);
    assert_eq!(stats.mutual_count, 2);
    assert_eq!(usernames(&report.result.not_following_back), vec!["carol", "Dave"]);
}

#[tokio::test]
async fn test_cached_result_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let export = create_test_export(&temp);
    let db_path = temp.path().join("followback.db");

    let report = {
        let engine = open_engine(&db_path);
        analyze(&engine, &export).await
    };

    let reopened = open_engine(&db_path);
    assert_eq!(reopened.cached_result(), Some(report.result));
}

#[tokio::test]
async fn test_whitelist_orders_last_and_survives_reset() {
    let temp = TempDir::new().unwrap();
    let export = create_test_export(&temp);
    let db_path = temp.path().join("followback.db");

    {
        let engine = open_engine(&db_path);
        analyze(&engine, &export).await;
        assert!(engine.whitelist().toggle("CAROL"));

        let shown = engine.present(SortKey::Username, "");
        assert_eq!(usernames(&shown), vec!["Dave", "carol"]);

        engine.reset();
        assert!(engine.cached_result().is_none());
        assert!(engine.present(SortKey::Username, "").is_empty());
    }

    let reopened = open_engine(&db_path);
    assert!(reopened.cached_result().is_none());
    assert!(reopened.whitelist().is_whitelisted("carol"));
    assert_eq!(reopened.whitelist().all(), vec!["CAROL".to_string()]);
}

#[tokio::test]
async fn test_sort_and_search_over_cached_analysis() {
    let temp = TempDir::new().unwrap();
    let export = create_test_export(&temp);
    let engine = open_engine(&temp.path().join("followback.db"));
    analyze(&engine, &export).await;

    assert_eq!(
        usernames(&engine.present(SortKey::Newest, "")),
        vec!["carol", "Dave"]
    );
    assert_eq!(
        usernames(&engine.present(SortKey::Oldest, "")),
        vec!["Dave", "carol"]
    );
    assert_eq!(usernames(&engine.present(SortKey::Username, "AV")), vec!["Dave"]);
    assert!(engine.present(SortKey::Username, "zzz").is_empty());
}

#[tokio::test]
async fn test_analyze_zipped_x_archive() {
    let temp = TempDir::new().unwrap();
    let zip_path = temp.path().join("twitter-archive.zip");
    {
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("data/follower.js", options).unwrap();
        zip.write_all(
            br#"window.YTD.follower.part0 = [
                {"follower": {"accountId": "1", "userLink": "https://x.com/user111"}}
            ]"#,
        )
        .unwrap();
        zip.start_file("data/following.js", options).unwrap();
        zip.write_all(
            br#"window.YTD.following.part0 = [
                {"following": {"accountId": "1", "userLink": "https://x.com/user111"}},
                {"following": {"accountId": "4", "userLink": "https://x.com/user444"}}
            ]"#,
        )
        .unwrap();
        zip.start_file("data/tweets.js", options).unwrap();
        zip.write_all(b"window.YTD.tweets.part0 = []").unwrap();
        zip.finish().unwrap();
    }

    let engine = Engine::in_memory(EngineOptions::default());
    let report = analyze(&engine, &zip_path).await;

    assert_eq!(report.documents, 2);
    assert_eq!(usernames(&report.result.not_following_back), vec!["user444"]);
    assert_eq!(
        report.result.not_following_back[0].profile_url,
        "https://x.com/user444"
    );
}

#[tokio::test]
async fn test_missing_following_list_is_reported() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("partial");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("followers_1.json"), FOLLOWERS_JSON).unwrap();

    let engine = Engine::in_memory(EngineOptions::default());
    let report = analyze(&engine, &dir).await;

    assert_eq!(report.result.stats.followers_count, 2);
    assert!(report.result.not_following_back.is_empty());
    assert!(report.warnings.contains(&EngineWarning::MissingList {
        kind: ListKind::Following
    }));
}

#[tokio::test]
async fn test_export_without_lists_keeps_previous_cache() {
    let temp = TempDir::new().unwrap();
    let export = create_test_export(&temp);
    let engine = open_engine(&temp.path().join("followback.db"));
    let report = analyze(&engine, &export).await;

    let empty = temp.path().join("empty");
    std::fs::create_dir_all(&empty).unwrap();
    std::fs::write(empty.join("notes.txt"), "nothing here").unwrap();
    let documents = archive::read_archive(&empty).unwrap();
    assert!(documents.is_empty());

    let outcome = engine.run(async { documents }).await;
    assert!(matches!(outcome, RunOutcome::Empty { .. }));
    assert_eq!(engine.cached_result(), Some(report.result));
}
