//! Storage tier selection with graceful degradation.
//!
//! Three backends can hold records:
//!
//! 1. **Durable** - a `SQLite` database file that survives restarts
//! 2. **Session** - a `SQLite` database in a temporary directory, removed
//!    when the selector is dropped
//! 3. **Memory** - an in-process map that cannot fail
//!
//! [`TierSelector::probe`] picks the first backend that survives a
//! write/read/delete of a sentinel key. The choice is made once. A write
//! that fails on the active tier is retried against memory, the selector
//! stays on memory from then on, and the caller gets a [`StorageWarning`]
//! back instead of an error.

use crate::error::{FollowbackError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Key written and removed while probing a backend.
pub const PROBE_KEY: &str = "__followback_probe__";

const PROBE_VALUE: &str = "probe";

/// Persistence backend in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Durable,
    Session,
    Memory,
}

impl Tier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Session => "session",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal signal that data went somewhere less durable than intended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageWarning {
    pub from: Tier,
    pub to: Tier,
    pub reason: String,
}

impl fmt::Display for StorageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} storage failed ({}); data is kept in {} storage until exit",
            self.from, self.reason, self.to
        )
    }
}

/// Result of a write that never fails the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written to the active tier.
    Stored(Tier),
    /// The active tier failed; the value landed in memory.
    Degraded(StorageWarning),
    /// Nothing was written (the value could not be serialized).
    Rejected(String),
}

impl WriteOutcome {
    #[must_use]
    pub const fn warning(&self) -> Option<&StorageWarning> {
        match self {
            Self::Degraded(warning) => Some(warning),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_stored(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Uniform keyed string storage.
pub trait KeyValueBackend {
    /// Tier this backend serves.
    fn tier(&self) -> Tier;

    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// # Errors
    /// Returns an error if the value cannot be stored (quota, IO, closed).
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<()>;

    /// # Errors
    /// Returns an error if the backend cannot be enumerated.
    fn keys(&self) -> Result<Vec<String>>;
}

// =============================================================================
// Memory backend
// =============================================================================

/// In-process map. The last resort, so it never fails.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn tier(&self) -> Tier {
        Tier::Memory
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

// =============================================================================
// SQLite backend
// =============================================================================

/// Key/value table in a `SQLite` database, optionally bounded by a byte quota.
pub struct SqliteBackend {
    conn: Connection,
    tier: Tier,
    quota_bytes: Option<u64>,
    // Held so the session database outlives the connection.
    _session_dir: Option<TempDir>,
}

impl SqliteBackend {
    /// Open the durable database at `db_path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open(db_path: impl AsRef<Path>, quota_bytes: Option<u64>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| FollowbackError::path_error("create", parent, e))?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        Self::init(conn, Tier::Durable, quota_bytes, None)
    }

    /// Open a session database in a fresh temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory or database cannot be created.
    pub fn session(quota_bytes: Option<u64>) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("followback-").tempdir()?;
        let conn = Connection::open(dir.path().join("session.db"))?;
        Self::init(conn, Tier::Session, quota_bytes, Some(dir))
    }

    fn init(
        conn: Connection,
        tier: Tier,
        quota_bytes: Option<u64>,
        session_dir: Option<TempDir>,
    ) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn,
            tier,
            quota_bytes,
            _session_dir: session_dir,
        })
    }

    /// Bytes stored under every key except `key`.
    fn used_bytes_excluding(&self, key: &str) -> Result<u64> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM kv WHERE key != ?",
            params![key],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(used).unwrap_or(0))
    }
}

impl KeyValueBackend for SqliteBackend {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let needed = self.used_bytes_excluding(key)? + value.len() as u64;
            if needed > quota {
                return Err(FollowbackError::QuotaExceeded { needed, quota });
            }
        }
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

// =============================================================================
// Selector
// =============================================================================

/// Dispatches to one backend chosen by probing, degrading to memory on write failure.
pub struct TierSelector {
    durable: Option<Box<dyn KeyValueBackend>>,
    session: Option<Box<dyn KeyValueBackend>>,
    memory: MemoryBackend,
    active: Cell<Tier>,
    warning: RefCell<Option<StorageWarning>>,
}

impl TierSelector {
    /// Probe the given backends and settle on a tier.
    pub fn probe(
        durable: Option<Box<dyn KeyValueBackend>>,
        session: Option<Box<dyn KeyValueBackend>>,
    ) -> Self {
        let selector = Self {
            durable,
            session,
            memory: MemoryBackend::new(),
            active: Cell::new(Tier::Memory),
            warning: RefCell::new(None),
        };
        let tier = selector.select();
        selector.active.set(tier);
        info!(tier = %tier, "Selected storage tier");
        selector
    }

    /// Selector that only ever uses the in-process map.
    #[must_use]
    pub fn memory_only() -> Self {
        Self::probe(None, None)
    }

    fn select(&self) -> Tier {
        for backend in [&self.durable, &self.session].into_iter().flatten() {
            match probe_backend(backend.as_ref()) {
                Ok(()) => return backend.tier(),
                Err(e) => {
                    warn!(tier = %backend.tier(), error = %e, "Storage tier probe failed");
                }
            }
        }
        Tier::Memory
    }

    /// Tier currently receiving reads and writes.
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.active.get()
    }

    /// Warning from the most recent downgrade, if any happened.
    #[must_use]
    pub fn warning(&self) -> Option<StorageWarning> {
        self.warning.borrow().clone()
    }

    fn active_backend(&self) -> &dyn KeyValueBackend {
        let backend = match self.active.get() {
            Tier::Durable => self.durable.as_deref(),
            Tier::Session => self.session.as_deref(),
            Tier::Memory => None,
        };
        backend.unwrap_or(&self.memory as &dyn KeyValueBackend)
    }

    /// Read a value. Backend failures read as absence.
    pub fn get(&self, key: &str) -> Option<String> {
        let backend = self.active_backend();
        match backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(tier = %backend.tier(), key, error = %e, "Storage read failed");
                None
            }
        }
    }

    /// Write a value, falling back to memory if the active tier refuses it.
    pub fn set(&self, key: &str, value: &str) -> WriteOutcome {
        let backend = self.active_backend();
        let from = backend.tier();
        match backend.set(key, value) {
            Ok(()) => WriteOutcome::Stored(from),
            Err(e) => {
                // The memory backend is infallible, so `from` is never Memory here.
                warn!(tier = %from, key, error = %e, "Storage write failed, falling back to memory");
                let _ = self.memory.set(key, value);
                self.active.set(Tier::Memory);
                let warning = StorageWarning {
                    from,
                    to: Tier::Memory,
                    reason: e.to_string(),
                };
                *self.warning.borrow_mut() = Some(warning.clone());
                WriteOutcome::Degraded(warning)
            }
        }
    }

    /// Delete a value. Failures are logged and ignored.
    pub fn remove(&self, key: &str) {
        let backend = self.active_backend();
        if let Err(e) = backend.remove(key) {
            warn!(tier = %backend.tier(), key, error = %e, "Storage remove failed");
        }
    }

    /// Keys in the active tier starting with `prefix`.
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        let backend = self.active_backend();
        match backend.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(prefix) && k != PROBE_KEY)
                .collect(),
            Err(e) => {
                warn!(tier = %backend.tier(), error = %e, "Storage enumeration failed");
                Vec::new()
            }
        }
    }
}

fn probe_backend(backend: &dyn KeyValueBackend) -> Result<()> {
    backend.set(PROBE_KEY, PROBE_VALUE)?;
    let read = backend.get(PROBE_KEY)?;
    backend.remove(PROBE_KEY)?;
    if read.as_deref() == Some(PROBE_VALUE) {
        debug!(tier = %backend.tier(), "Storage tier probe succeeded");
        Ok(())
    } else {
        Err(FollowbackError::storage_unavailable(
            backend.tier().as_str(),
            "probe value did not round-trip",
        ))
    }
}
