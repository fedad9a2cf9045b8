//! Pipeline wiring: documents in, persisted analysis and ordered view out.
//!
//! The engine owns the record store, the whitelist and the extractor, and
//! guards analysis runs with a monotonically increasing [`RunId`]. A run that
//! is overtaken by a newer one while it is suspended is discarded and never
//! persisted.

use crate::analyze::{analyze, analyze_cooperative};
use crate::chunked::{ChunkScheduler, DEFAULT_CHUNK_SIZE};
use crate::extract::{ExtractConfig, Extraction, ExtractionOutcome, Extractor};
use crate::logging::OperationGuard;
use crate::model::{Account, AnalysisResult, ListKind, SortKey};
use crate::present::{present, present_cooperative};
use crate::records::RecordStore;
use crate::tiers::{KeyValueBackend, SqliteBackend, StorageWarning, Tier, TierSelector};
use crate::whitelist::{DEFAULT_WHITELIST_MAX_AGE, WhitelistStore};
use serde::Serialize;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Record key of the cached analysis (before the namespace prefix).
pub const ANALYSIS_KEY: &str = "analysis";

/// Namespace prefix for every record the engine writes.
pub const DEFAULT_KEY_PREFIX: &str = "followback_";

pub const DEFAULT_ANALYSIS_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Export documents keyed by their path inside the archive.
pub type DocumentSet = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub key_prefix: String,
    pub analysis_max_age: Duration,
    pub whitelist_max_age: Duration,
    pub chunk_size: usize,
    pub extract: ExtractConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            analysis_max_age: DEFAULT_ANALYSIS_MAX_AGE,
            whitelist_max_age: DEFAULT_WHITELIST_MAX_AGE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            extract: ExtractConfig::default(),
        }
    }
}

/// Identifier of one analysis run. Later runs compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunId(u64);

impl RunId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something the caller should be told about, but which did not stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineWarning {
    /// No strategy found any account in the document.
    ParseFailure { path: String, kind: ListKind },
    /// The document was not text.
    InvalidDocument { path: String },
    /// No document described this side of the relationship.
    MissingList { kind: ListKind },
    StorageDegraded(StorageWarning),
}

impl fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseFailure { path, kind } => {
                write!(f, "No {kind} accounts could be read from '{path}'")
            }
            Self::InvalidDocument { path } => write!(f, "'{path}' is not a text document"),
            Self::MissingList { kind } => write!(f, "No {kind} list found in the archive"),
            Self::StorageDegraded(warning) => write!(f, "{warning}"),
        }
    }
}

/// Accepted output of one run.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub run: RunId,
    pub result: AnalysisResult,
    pub warnings: Vec<EngineWarning>,
    /// Documents that were classified and read.
    pub documents: usize,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Accepted(AnalysisReport),
    /// Neither list produced any account; nothing was persisted.
    Empty { run: RunId, warnings: Vec<EngineWarning> },
    /// A newer run started before this one finished; its result was dropped.
    Stale { run: RunId, current: RunId },
}

/// Which list a document path describes, if any.
///
/// Looks at the lowercased file stem: `following` wins over `follower`, and
/// stems mentioning hashtags, requests or unfollows are ignored.
#[must_use]
pub fn classify_path(path: &str) -> Option<ListKind> {
    let stem = Path::new(path).file_stem()?.to_str()?.to_lowercase();
    if ["hashtag", "request", "unfollow"]
        .iter()
        .any(|word| stem.contains(word))
    {
        return None;
    }
    if stem.contains("following") {
        Some(ListKind::Following)
    } else if stem.contains("follower") {
        Some(ListKind::Followers)
    } else {
        None
    }
}

#[derive(Default)]
struct Collected {
    followers: Vec<Account>,
    following: Vec<Account>,
    warnings: Vec<EngineWarning>,
    documents: usize,
    seen_kinds: Vec<ListKind>,
}

impl Collected {
    fn add(&mut self, path: &str, extraction: Extraction) {
        self.documents += 1;
        if !self.seen_kinds.contains(&extraction.kind) {
            self.seen_kinds.push(extraction.kind);
        }
        match extraction.outcome {
            ExtractionOutcome::InvalidInput => {
                self.warnings.push(EngineWarning::InvalidDocument {
                    path: path.to_string(),
                });
            }
            ExtractionOutcome::Empty => {
                self.warnings.push(EngineWarning::ParseFailure {
                    path: path.to_string(),
                    kind: extraction.kind,
                });
            }
            ExtractionOutcome::Matched(_) | ExtractionOutcome::Fallback => {}
        }
        match extraction.kind {
            ListKind::Followers => self.followers.extend(extraction.accounts),
            ListKind::Following => self.following.extend(extraction.accounts),
        }
    }

    fn note_missing(&mut self) {
        for kind in [ListKind::Followers, ListKind::Following] {
            if !self.seen_kinds.contains(&kind) {
                self.warnings.push(EngineWarning::MissingList { kind });
            }
        }
    }
}

pub struct Engine {
    records: Rc<RecordStore>,
    whitelist: WhitelistStore,
    extractor: Extractor,
    options: EngineOptions,
    current_run: Cell<u64>,
}

impl Engine {
    /// Build the engine on an existing record store and sweep stale records.
    pub fn new(records: RecordStore, options: EngineOptions) -> Self {
        let records = Rc::new(records);
        let swept = records.sweep_namespace(options.analysis_max_age);
        if swept > 0 {
            info!(swept, "Removed expired records");
        }
        let whitelist = WhitelistStore::load(Rc::clone(&records), options.whitelist_max_age);
        let extractor = Extractor::new(options.extract.clone());
        Self {
            records,
            whitelist,
            extractor,
            options,
            current_run: Cell::new(0),
        }
    }

    /// Open storage at `db_path` (durable), falling back to a session
    /// database and then to memory.
    pub fn open(db_path: &Path, quota_bytes: Option<u64>, options: EngineOptions) -> Self {
        let durable = match SqliteBackend::open(db_path, quota_bytes) {
            Ok(backend) => Some(Box::new(backend) as Box<dyn KeyValueBackend>),
            Err(e) => {
                warn!(path = %db_path.display(), error = %e, "Durable storage unavailable");
                None
            }
        };
        let session = match SqliteBackend::session(quota_bytes) {
            Ok(backend) => Some(Box::new(backend) as Box<dyn KeyValueBackend>),
            Err(e) => {
                warn!(error = %e, "Session storage unavailable");
                None
            }
        };
        let tiers = TierSelector::probe(durable, session);
        let prefix = options.key_prefix.clone();
        Self::new(RecordStore::new(tiers, prefix), options)
    }

    /// Engine whose records live only as long as the process.
    #[must_use]
    pub fn in_memory(options: EngineOptions) -> Self {
        let prefix = options.key_prefix.clone();
        Self::new(RecordStore::new(TierSelector::memory_only(), prefix), options)
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    #[must_use]
    pub fn whitelist(&self) -> &WhitelistStore {
        &self.whitelist
    }

    #[must_use]
    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.records.tier()
    }

    #[must_use]
    pub fn storage_warning(&self) -> Option<StorageWarning> {
        self.records.storage_warning()
    }

    /// Start a new run. Every earlier run becomes stale.
    pub fn begin_run(&self) -> RunId {
        let next = self.current_run.get() + 1;
        self.current_run.set(next);
        debug!(run = next, "Started analysis run");
        RunId(next)
    }

    #[must_use]
    pub fn current_run(&self) -> RunId {
        RunId(self.current_run.get())
    }

    #[must_use]
    pub fn is_current(&self, run: RunId) -> bool {
        run.0 == self.current_run.get()
    }

    /// Extract, analyze and persist in one synchronous pass.
    pub fn analyze_documents(&self, run: RunId, documents: &DocumentSet) -> RunOutcome {
        if let Some(stale) = self.stale(run) {
            return stale;
        }
        let guard = OperationGuard::new(format!("analysis run {run}"));
        let mut collected = Collected::default();
        for (path, kind, bytes) in classified(documents) {
            collected.add(path, self.extractor.extract_bytes(bytes, kind));
        }
        let outcome = self.finish_run(run, collected, analyze);
        guard.complete();
        outcome
    }

    /// Same as [`analyze_documents`](Self::analyze_documents), yielding to the
    /// runtime between chunks. Newer runs started meanwhile win.
    pub async fn analyze_documents_cooperative(
        &self,
        run: RunId,
        documents: &DocumentSet,
    ) -> RunOutcome {
        let guard = OperationGuard::new(format!("analysis run {run}"));
        let mut scheduler = ChunkScheduler::new(self.options.chunk_size);
        let mut collected = Collected::default();

        for (path, kind, bytes) in classified(documents) {
            if let Some(stale) = self.stale(run) {
                return stale;
            }
            let extraction = match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.extractor
                        .extract_cooperative(text, kind, &mut scheduler)
                        .await
                }
                // Reuse the synchronous path for its warning and outcome.
                Err(_) => self.extractor.extract_bytes(bytes, kind),
            };
            collected.add(path, extraction);
        }
        if let Some(stale) = self.stale(run) {
            return stale;
        }

        let followers = std::mem::take(&mut collected.followers);
        let following = std::mem::take(&mut collected.following);
        let result = analyze_cooperative(followers, following, &mut scheduler).await;
        if let Some(stale) = self.stale(run) {
            return stale;
        }

        let outcome = self.finish_run(run, collected, |_, _| result);
        debug!(yields = scheduler.yields(), "Cooperative run finished");
        guard.complete();
        outcome
    }

    /// Start a run, wait for `source` to deliver the documents, then analyze.
    pub async fn run<F>(&self, source: F) -> RunOutcome
    where
        F: Future<Output = DocumentSet>,
    {
        let run = self.begin_run();
        let documents = source.await;
        self.analyze_documents_cooperative(run, &documents).await
    }

    /// The persisted analysis, if present and not expired.
    #[must_use]
    pub fn cached_result(&self) -> Option<AnalysisResult> {
        self.records
            .take_with_default(ANALYSIS_KEY, Some(self.options.analysis_max_age))
    }

    /// Drop the cached analysis. The whitelist is kept.
    pub fn reset(&self) {
        self.records.remove(ANALYSIS_KEY);
        info!("Analysis cache cleared");
    }

    /// Ordered, filtered not-following-back list from the cached analysis.
    #[must_use]
    pub fn present(&self, sort: SortKey, search: &str) -> Vec<Account> {
        self.cached_result()
            .map(|result| {
                present(
                    &result.not_following_back,
                    &self.whitelist.as_set(),
                    sort,
                    search,
                )
            })
            .unwrap_or_default()
    }

    /// [`Engine::present`] yielding between chunks of the cached list.
    pub async fn present_cooperative(&self, sort: SortKey, search: &str) -> Vec<Account> {
        let Some(result) = self.cached_result() else {
            return Vec::new();
        };
        let mut scheduler = ChunkScheduler::new(self.options.chunk_size);
        present_cooperative(
            &result.not_following_back,
            &self.whitelist.as_set(),
            sort,
            search,
            &mut scheduler,
        )
        .await
    }

    fn stale(&self, run: RunId) -> Option<RunOutcome> {
        if self.is_current(run) {
            return None;
        }
        let current = self.current_run();
        info!(run = run.0, current = current.0, "Discarding stale analysis run");
        Some(RunOutcome::Stale { run, current })
    }

    fn finish_run(
        &self,
        run: RunId,
        mut collected: Collected,
        analyze_fn: impl FnOnce(Vec<Account>, Vec<Account>) -> AnalysisResult,
    ) -> RunOutcome {
        collected.note_missing();
        if collected.documents == 0 {
            warn!(run = run.0, "No follower or following documents found");
            return RunOutcome::Empty {
                run,
                warnings: collected.warnings,
            };
        }

        let followers = std::mem::take(&mut collected.followers);
        let following = std::mem::take(&mut collected.following);
        let result = analyze_fn(followers, following);
        if result.stats.followers_count == 0 && result.stats.following_count == 0 {
            warn!(run = run.0, "Documents contained no accounts");
            return RunOutcome::Empty {
                run,
                warnings: collected.warnings,
            };
        }

        let outcome = self
            .records
            .put(ANALYSIS_KEY, &result, self.options.analysis_max_age);
        if let Some(warning) = outcome.warning() {
            collected
                .warnings
                .push(EngineWarning::StorageDegraded(warning.clone()));
        }

        info!(
            run = run.0,
            documents = collected.documents,
            not_following_back = result.stats.not_following_back_count,
            warnings = collected.warnings.len(),
            "Analysis run accepted"
        );
        RunOutcome::Accepted(AnalysisReport {
            run,
            result,
            warnings: collected.warnings,
            documents: collected.documents,
        })
    }
}

fn classified(documents: &DocumentSet) -> impl Iterator<Item = (&str, ListKind, &[u8])> {
    documents.iter().filter_map(|(path, bytes)| match classify_path(path) {
        Some(kind) => Some((path.as_str(), kind, bytes.as_slice())),
        None => {
            debug!(path, "Skipping document outside the follower lists");
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ManualClock;

    const FOLLOWERS_JSON: &str = r#"[
        {"title": "", "string_list_data": [{"href": "https://www.instagram.com/alice", "value": "alice", "timestamp": 1700000000}]},
        {"title": "", "string_list_data": [{"href": "https://www.instagram.com/bob", "value": "bob", "timestamp": 1700000100}]}
    ]"#;

    const FOLLOWING_JSON: &str = r#"{"relationships_following": [
        {"title": "", "string_list_data": [{"href": "https://www.instagram.com/alice", "value": "alice", "timestamp": 1690000000}]},
        {"title": "", "string_list_data": [{"href": "https://www.instagram.com/carol", "value": "carol", "timestamp": 1690000100}]},
        {"title": "", "string_list_data": [{"href": "https://www.instagram.com/dave", "value": "dave", "timestamp": 1690000200}]}
    ]}"#;

    fn documents() -> DocumentSet {
        let mut docs = DocumentSet::new();
        docs.insert(
            "connections/followers_and_following/followers_1.json".to_string(),
            FOLLOWERS_JSON.as_bytes().to_vec(),
        );
        docs.insert(
            "connections/followers_and_following/following.json".to_string(),
            FOLLOWING_JSON.as_bytes().to_vec(),
        );
        docs.insert(
            "connections/followers_and_following/following_hashtags.json".to_string(),
            b"[]".to_vec(),
        );
        docs
    }

    fn names(accounts: &[Account]) -> Vec<&str> {
        accounts.iter().map(|a| a.username.as_str()).collect()
    }

    fn accepted(outcome: RunOutcome) -> AnalysisReport {
        match outcome {
            RunOutcome::Accepted(report) => report,
            other => panic!("expected an accepted run, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_path() {
        assert_eq!(classify_path("a/followers_1.json"), Some(ListKind::Followers));
        assert_eq!(classify_path("data/follower.js"), Some(ListKind::Followers));
        assert_eq!(classify_path("a/following.html"), Some(ListKind::Following));
        assert_eq!(classify_path("a/Following.HTML"), Some(ListKind::Following));
        assert_eq!(classify_path("a/following_hashtags.json"), None);
        assert_eq!(classify_path("a/pending_follow_requests.json"), None);
        assert_eq!(classify_path("a/recently_unfollowed_profiles.json"), None);
        assert_eq!(classify_path("a/close_friends.json"), None);
    }

    #[test]
    fn test_analyze_documents_persists_result() {
        let engine = Engine::in_memory(EngineOptions::default());
        let run = engine.begin_run();
        let report = accepted(engine.analyze_documents(run, &documents()));

        assert_eq!(report.documents, 2);
        assert_eq!(names(&report.result.not_following_back), vec!["carol", "dave"]);
        assert_eq!(report.result.stats.mutual_count, 1);
        assert!(report.warnings.is_empty());
        assert_eq!(engine.cached_result(), Some(report.result));
    }

    #[test]
    fn test_stale_run_is_not_persisted() {
        let engine = Engine::in_memory(EngineOptions::default());
        let old = engine.begin_run();
        let new = engine.begin_run();

        let outcome = engine.analyze_documents(old, &documents());
        assert!(matches!(outcome, RunOutcome::Stale { run, current } if run == old && current == new));
        assert!(engine.cached_result().is_none());
    }

    #[tokio::test]
    async fn test_overtaken_cooperative_run_is_discarded() {
        let options = EngineOptions {
            chunk_size: 1,
            ..EngineOptions::default()
        };
        let engine = Engine::in_memory(options);

        let mut only_followers = DocumentSet::new();
        only_followers.insert("followers_1.json".to_string(), FOLLOWERS_JSON.as_bytes().to_vec());

        let first = engine.run(async { documents() });
        let second = engine.run(async { only_followers });
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, RunOutcome::Stale { .. }));
        let report = accepted(second);
        assert_eq!(report.run, RunId(2));
        assert_eq!(engine.cached_result(), Some(report.result));
    }

    #[tokio::test]
    async fn test_cooperative_matches_sync() {
        let engine = Engine::in_memory(EngineOptions::default());
        let run = engine.begin_run();
        let sync = accepted(engine.analyze_documents(run, &documents()));
        let coop = accepted(engine.run(async { documents() }).await);
        assert_eq!(sync.result, coop.result);
    }

    #[test]
    fn test_reset_keeps_whitelist() {
        let engine = Engine::in_memory(EngineOptions::default());
        engine.whitelist().toggle("carol");
        let run = engine.begin_run();
        accepted(engine.analyze_documents(run, &documents()));

        engine.reset();
        assert!(engine.cached_result().is_none());
        assert!(engine.whitelist().is_whitelisted("carol"));
        assert!(engine.present(SortKey::Username, "").is_empty());
    }

    #[test]
    fn test_present_demotes_whitelisted() {
        let engine = Engine::in_memory(EngineOptions::default());
        let run = engine.begin_run();
        accepted(engine.analyze_documents(run, &documents()));

        engine.whitelist().toggle("carol");
        assert_eq!(names(&engine.present(SortKey::Username, "")), vec!["dave", "carol"]);
        assert_eq!(names(&engine.present(SortKey::Username, "CAR")), vec!["carol"]);
    }

    #[tokio::test]
    async fn test_cooperative_present_matches_sync() {
        let engine = Engine::in_memory(EngineOptions {
            chunk_size: 1,
            ..EngineOptions::default()
        });
        assert!(engine.present_cooperative(SortKey::Newest, "").await.is_empty());

        accepted(engine.analyze_documents(engine.begin_run(), &documents()));
        engine.whitelist().toggle("carol");
        for sort in [SortKey::Username, SortKey::Newest, SortKey::Oldest] {
            assert_eq!(
                engine.present_cooperative(sort, "").await,
                engine.present(sort, "")
            );
        }
    }

    #[test]
    fn test_missing_list_and_parse_failure_warnings() {
        let engine = Engine::in_memory(EngineOptions::default());
        let mut docs = DocumentSet::new();
        docs.insert("following.json".to_string(), FOLLOWING_JSON.as_bytes().to_vec());
        docs.insert("followers_2.json".to_string(), b"{}".to_vec());
        docs.insert("followers_3.html".to_string(), vec![0xff, 0xfe, 0x00]);

        let run = engine.begin_run();
        let report = accepted(engine.analyze_documents(run, &docs));
        assert!(report.warnings.contains(&EngineWarning::ParseFailure {
            path: "followers_2.json".to_string(),
            kind: ListKind::Followers,
        }));
        assert!(report.warnings.contains(&EngineWarning::InvalidDocument {
            path: "followers_3.html".to_string(),
        }));
        assert_eq!(report.result.stats.not_following_back_count, 3);
    }

    #[test]
    fn test_no_documents_is_empty_and_keeps_cache() {
        let engine = Engine::in_memory(EngineOptions::default());
        let run = engine.begin_run();
        accepted(engine.analyze_documents(run, &documents()));

        let mut unrelated = DocumentSet::new();
        unrelated.insert("messages/inbox.json".to_string(), b"[]".to_vec());
        let run = engine.begin_run();
        match engine.analyze_documents(run, &unrelated) {
            RunOutcome::Empty { warnings, .. } => assert_eq!(warnings.len(), 2),
            other => panic!("expected an empty run, got {other:?}"),
        }
        assert!(engine.cached_result().is_some());
    }

    #[test]
    fn test_cached_result_expires() {
        let clock = ManualClock::new(0);
        let records = RecordStore::with_clock(
            TierSelector::memory_only(),
            DEFAULT_KEY_PREFIX,
            Box::new(clock.clone()),
        );
        let engine = Engine::new(records, EngineOptions::default());
        let run = engine.begin_run();
        accepted(engine.analyze_documents(run, &documents()));

        clock.advance(DEFAULT_ANALYSIS_MAX_AGE + Duration::from_secs(1));
        assert!(engine.cached_result().is_none());
    }

    #[test]
    fn test_open_uses_durable_tier() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("followback.db");
        {
            let engine = Engine::open(&db, None, EngineOptions::default());
            assert_eq!(engine.tier(), Tier::Durable);
            let run = engine.begin_run();
            accepted(engine.analyze_documents(run, &documents()));
            engine.whitelist().toggle("dave");
        }
        let reopened = Engine::open(&db, None, EngineOptions::default());
        assert!(reopened.cached_result().is_some());
        assert_eq!(reopened.whitelist().all(), vec!["dave"]);
    }

    #[test]
    fn test_quota_degrades_to_memory_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(&dir.path().join("tiny.db"), Some(64), EngineOptions::default());
        let run = engine.begin_run();
        let report = accepted(engine.analyze_documents(run, &documents()));

        assert!(matches!(
            report.warnings.as_slice(),
            [EngineWarning::StorageDegraded(_)]
        ));
        assert_eq!(engine.tier(), Tier::Memory);
        assert!(engine.cached_result().is_some());
    }
}
