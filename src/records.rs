//! Expiry-aware record store on top of the tier selector.
//!
//! Every value is wrapped in a [`StorageRecord`] carrying its write time and
//! the max-age it was written with. Reads past expiry delete the record and
//! report absence; records that no longer parse are treated the same way.

use crate::tiers::{StorageWarning, Tier, TierSelector, WriteOutcome};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

/// Format version written into every record.
pub const RECORD_VERSION: &str = "1.0";

/// Source of "now" in epoch milliseconds.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<i64>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + duration_ms(by));
    }

    pub fn set(&self, now_ms: i64) {
        self.now.set(now_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}

/// Per-record options persisted alongside the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,
}

/// Envelope stored for every key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRecord<T> {
    pub data: T,
    /// Write time, epoch milliseconds.
    pub timestamp: i64,
    pub version: String,
    #[serde(default)]
    pub options: RecordOptions,
}

impl<T> StorageRecord<T> {
    /// True when `now - timestamp > max_age`.
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64, max_age_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp) > max_age_ms
    }
}

/// Envelope with the payload left unparsed, used when only expiry matters.
#[derive(Debug, Deserialize)]
struct RecordHeader {
    timestamp: i64,
    #[serde(default)]
    options: RecordOptions,
}

/// Namespaced, expiring key/value records.
pub struct RecordStore {
    tiers: TierSelector,
    clock: Box<dyn Clock>,
    prefix: String,
}

impl RecordStore {
    pub fn new(tiers: TierSelector, prefix: impl Into<String>) -> Self {
        Self::with_clock(tiers, prefix, Box::new(SystemClock))
    }

    pub fn with_clock(tiers: TierSelector, prefix: impl Into<String>, clock: Box<dyn Clock>) -> Self {
        Self {
            tiers,
            clock,
            prefix: prefix.into(),
        }
    }

    /// Namespace prefix applied to every key.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tiers.tier()
    }

    /// Sticky warning from a storage downgrade, if one happened.
    #[must_use]
    pub fn storage_warning(&self) -> Option<StorageWarning> {
        self.tiers.warning()
    }

    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Store `data` under `key` with the given max-age.
    pub fn put<T: Serialize>(&self, key: &str, data: &T, max_age: Duration) -> WriteOutcome {
        let record = StorageRecord {
            data,
            timestamp: self.clock.now_ms(),
            version: RECORD_VERSION.to_string(),
            options: RecordOptions {
                max_age: Some(duration_ms(max_age)),
            },
        };
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Could not serialize record");
                return WriteOutcome::Rejected(e.to_string());
            }
        };
        let outcome = self.tiers.set(&self.full_key(key), &json);
        debug!(key, bytes = json.len(), ?outcome, "Stored record");
        outcome
    }

    /// Read the payload under `key`, honoring the max-age it was written with.
    pub fn take<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.take_with_default(key, None)
    }

    /// Like [`take`](Self::take), but `default_max_age` applies to records
    /// written without a max-age.
    pub fn take_with_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default_max_age: Option<Duration>,
    ) -> Option<T> {
        let full_key = self.full_key(key);
        let raw = self.tiers.get(&full_key)?;
        let record: StorageRecord<T> = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "Dropping corrupt record");
                self.tiers.remove(&full_key);
                return None;
            }
        };
        let max_age = record
            .options
            .max_age
            .or_else(|| default_max_age.map(duration_ms));
        if let Some(max_age) = max_age {
            if record.is_expired(self.clock.now_ms(), max_age) {
                debug!(key, "Record expired");
                self.tiers.remove(&full_key);
                return None;
            }
        }
        Some(record.data)
    }

    /// Delete the record under `key`.
    pub fn remove(&self, key: &str) {
        self.tiers.remove(&self.full_key(key));
    }

    /// Evict expired or corrupt records whose full key starts with `prefix`.
    ///
    /// Records carry their own max-age; `default_max_age` covers those that
    /// don't. Returns the number of evicted keys.
    pub fn sweep(&self, prefix: &str, default_max_age: Duration) -> usize {
        let now = self.clock.now_ms();
        let default_ms = duration_ms(default_max_age);
        let mut evicted = 0;
        for key in self.tiers.keys(prefix) {
            let Some(raw) = self.tiers.get(&key) else {
                continue;
            };
            let expired = match serde_json::from_str::<RecordHeader>(&raw) {
                Ok(header) => {
                    let max_age = header.options.max_age.unwrap_or(default_ms);
                    now.saturating_sub(header.timestamp) > max_age
                }
                Err(e) => {
                    warn!(key, error = %e, "Dropping corrupt record during sweep");
                    true
                }
            };
            if expired {
                self.tiers.remove(&key);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(prefix, evicted, "Swept stale records");
        }
        evicted
    }

    /// Sweep this store's own namespace.
    pub fn sweep_namespace(&self, default_max_age: Duration) -> usize {
        let prefix = self.prefix.clone();
        self.sweep(&prefix, default_max_age)
    }

    /// Write a raw string under a namespaced key, bypassing the envelope.
    #[cfg(test)]
    pub(crate) fn put_raw(&self, key: &str, raw: &str) {
        self.tiers.set(&self.full_key(key), raw);
    }

    #[cfg(test)]
    pub(crate) fn raw(&self, key: &str) -> Option<String> {
        self.tiers.get(&self.full_key(key))
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
