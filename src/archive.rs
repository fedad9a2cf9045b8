//! Export archive reader.
//!
//! Turns an extracted export directory, a downloaded `.zip`, or a single
//! document into the [`DocumentSet`] the engine consumes. Only files whose
//! name marks them as a follower or following list are read.

use crate::engine::{DocumentSet, classify_path};
use crate::error::{FollowbackError, Result, ResultExt};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// File extensions that can hold an export list.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["html", "htm", "json", "js", "txt"];

/// Largest single document [`read_archive`] accepts (256 MiB).
pub const MAX_DOCUMENT_BYTES: u64 = 256 * 1024 * 1024;

/// True when `path` looks like a follower/following export document.
#[must_use]
pub fn is_export_document(path: &str) -> bool {
    let has_extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DOCUMENT_EXTENSIONS.contains(&e.to_lowercase().as_str()));
    has_extension && classify_path(path).is_some()
}

/// Read every export document under `path`.
///
/// # Errors
///
/// Returns an error if the path does not exist, is not a directory, zip or
/// export document, cannot be read, or holds a document larger than
/// [`MAX_DOCUMENT_BYTES`].
pub fn read_archive(path: &Path) -> Result<DocumentSet> {
    read_archive_with_limit(path, MAX_DOCUMENT_BYTES)
}

/// [`read_archive`] with a caller-chosen per-document byte limit.
///
/// The limit applies to decompressed size, so a small zip cannot expand
/// past it.
///
/// # Errors
///
/// Same as [`read_archive`].
pub fn read_archive_with_limit(path: &Path, limit: u64) -> Result<DocumentSet> {
    if !path.exists() {
        return Err(FollowbackError::archive_not_found(path));
    }

    let documents = if path.is_dir() {
        read_directory(path, limit)?
    } else if has_zip_extension(path) {
        read_zip(path, limit)?
    } else {
        let name = path.to_string_lossy().replace('\\', "/");
        if !is_export_document(&name) {
            return Err(FollowbackError::unsupported_archive(
                path,
                "expected a directory, a .zip file or a followers/following document",
            ));
        }
        let bytes = read_file(path, &name, path, limit)?;
        let mut documents = DocumentSet::new();
        documents.insert(name, bytes);
        documents
    };

    info!(
        path = %path.display(),
        documents = documents.len(),
        "Read export archive"
    );
    Ok(documents)
}

fn has_zip_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Read at most `limit` bytes. `None` when the source holds more.
fn read_limited(reader: impl Read, limit: u64) -> std::io::Result<Option<Vec<u8>>> {
    let mut bytes = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    let within = u64::try_from(bytes.len()).is_ok_and(|n| n <= limit);
    Ok(within.then_some(bytes))
}

fn too_large(archive: &Path, name: &str, limit: u64) -> FollowbackError {
    FollowbackError::unsupported_archive(
        archive,
        format!("'{name}' exceeds the {limit} byte document limit"),
    )
}

fn read_file(file: &Path, name: &str, archive: &Path, limit: u64) -> Result<Vec<u8>> {
    let handle = File::open(file).map_err(|e| FollowbackError::path_error("open", file, e))?;
    read_limited(handle, limit)
        .map_err(|e| FollowbackError::path_error("read", file, e))?
        .ok_or_else(|| too_large(archive, name, limit))
}

fn read_directory(root: &Path, limit: u64) -> Result<DocumentSet> {
    let mut documents = DocumentSet::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.context("Failed to walk export directory")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if !is_export_document(&relative) {
            continue;
        }
        let bytes = read_file(entry.path(), &relative, root, limit)?;
        debug!(path = %relative, bytes = bytes.len(), "Read export document");
        documents.insert(relative, bytes);
    }
    Ok(documents)
}

fn read_zip(path: &Path, limit: u64) -> Result<DocumentSet> {
    let file = File::open(path).map_err(|e| FollowbackError::path_error("open", path, e))?;
    let mut zip = zip::ZipArchive::new(file)?;
    let mut documents = DocumentSet::new();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        // Entries with absolute or parent-escaping names are skipped.
        let Some(name) = entry.enclosed_name() else {
            debug!(name = entry.name(), "Skipping unsafe zip entry");
            continue;
        };
        let name = name.to_string_lossy().replace('\\', "/");
        if !is_export_document(&name) {
            continue;
        }
        // The declared size is checked first, the bounded read catches lies.
        if entry.size() > limit {
            return Err(too_large(path, &name, limit));
        }
        let bytes =
            read_limited(&mut entry, limit)?.ok_or_else(|| too_large(path, &name, limit))?;
        debug!(path = %name, bytes = bytes.len(), "Read zipped export document");
        documents.insert(name, bytes);
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_is_export_document() {
        assert!(is_export_document("connections/followers_1.html"));
        assert!(is_export_document("data/following.js"));
        assert!(!is_export_document("data/following.png"));
        assert!(!is_export_document("media/photo.json"));
        assert!(!is_export_document("following_hashtags.json"));
    }

    #[test]
    fn test_read_directory_keeps_relationship_documents() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "connections/followers_1.html", "<a href='/alice'>alice</a>");
        write(dir.path(), "connections/following.html", "<a href='/bob'>bob</a>");
        write(dir.path(), "connections/close_friends.html", "<p>x</p>");
        write(dir.path(), "media/posts.json", "[]");

        let documents = read_archive(dir.path()).unwrap();
        let paths: Vec<&str> = documents.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec!["connections/followers_1.html", "connections/following.html"]
        );
    }

    #[test]
    fn test_read_zip() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("export.zip");
        {
            let file = File::create(&zip_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("data/follower.js", options).unwrap();
            zip.write_all(b"window.YTD.follower.part0 = []").unwrap();
            zip.start_file("data/tweets.js", options).unwrap();
            zip.write_all(b"window.YTD.tweets.part0 = []").unwrap();
            zip.finish().unwrap();
        }

        let documents = read_archive(&zip_path).unwrap();
        assert_eq!(documents.len(), 1);
        assert!(documents.contains_key("data/follower.js"));
    }

    #[test]
    fn test_oversized_zip_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("export.zip");
        {
            let file = File::create(&zip_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("data/tweets.js", options).unwrap();
            zip.write_all(&[b' '; 4096]).unwrap();
            zip.start_file("data/following.js", options).unwrap();
            zip.write_all(&[b' '; 2048]).unwrap();
            zip.finish().unwrap();
        }

        let err = read_archive_with_limit(&zip_path, 1024).unwrap_err();
        assert!(matches!(err, FollowbackError::UnsupportedArchive { .. }));
        assert!(err.to_string().contains("data/following.js"));

        // Only relationship documents count against the limit.
        let documents = read_archive_with_limit(&zip_path, 2048).unwrap();
        assert_eq!(documents["data/following.js"].len(), 2048);
    }

    #[test]
    fn test_oversized_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "connections/following.html", &"x".repeat(600));

        let err = read_archive_with_limit(dir.path(), 512).unwrap_err();
        assert!(err.to_string().contains("connections/following.html"));
        let single = dir.path().join("connections/following.html");
        assert!(read_archive_with_limit(&single, 512).is_err());

        let documents = read_archive_with_limit(dir.path(), 600).unwrap();
        assert_eq!(documents.len(), 1);
    }

    #[test]
    fn test_read_limited_boundary() {
        assert_eq!(read_limited(&b"abc"[..], 3).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(read_limited(&b"abcd"[..], 3).unwrap(), None);
        assert_eq!(read_limited(&b""[..], 0).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_read_single_document() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "following.txt", "@carol");
        let documents = read_archive(&dir.path().join("following.txt")).unwrap();
        assert_eq!(documents.len(), 1);
    }

    #[test]
    fn test_missing_and_unsupported_paths() {
        let dir = TempDir::new().unwrap();
        let missing = read_archive(&dir.path().join("nope"));
        assert!(matches!(missing, Err(FollowbackError::ArchiveNotFound { .. })));

        write(dir.path(), "notes.md", "hello");
        let unsupported = read_archive(&dir.path().join("notes.md"));
        assert!(matches!(
            unsupported,
            Err(FollowbackError::UnsupportedArchive { .. })
        ));
    }
}
