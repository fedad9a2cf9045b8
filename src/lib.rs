//! followback - find accounts that don't follow you back
//!
//! This library reads the follower and following lists out of a social
//! network data export, computes who doesn't follow back, and keeps the
//! result and a user-curated whitelist between runs.
//!
//! # Modules
//!
//! - [`tiers`] - Durable/session/memory storage with graceful degradation
//! - [`records`] - Expiring records on top of the storage tiers
//! - [`extract`] - Account extraction from HTML, JSON and plain-text exports
//! - [`analyze`] - Deduplication and the not-following-back set difference
//! - [`whitelist`] - Persistent whitelist and remote reconciliation
//! - [`present`] - Display ordering and search
//! - [`engine`] - Pipeline wiring and stale-run protection
//! - [`archive`] - Directory and zip export reader
//! - [`cli`] - Command-line interface definitions

pub mod analyze;
pub mod archive;
pub mod chunked;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod logging;
pub mod model;
pub mod present;
pub mod records;
pub mod sanitize;
pub mod tiers;
pub mod whitelist;

pub use engine::{
    AnalysisReport, DocumentSet, Engine, EngineOptions, EngineWarning, RunId, RunOutcome,
};
pub use error::{FollowbackError, Result, ResultExt, format_error};
pub use model::*;
pub use tiers::{StorageWarning, Tier, WriteOutcome};
pub use whitelist::{SyncOutcome, WhitelistPayload, WhitelistRemote, WhitelistStore};

use chrono::{DateTime, Datelike, Utc};

/// Default database filename
pub const DEFAULT_DB_NAME: &str = "followback.db";

/// Standard width for content dividers in CLI output
pub const CONTENT_DIVIDER_WIDTH: usize = 60;

const BYTES_PER_KB: u64 = 1024;
const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Get the default data directory for followback
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("followback")
}

/// Get the default database path
#[must_use]
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join(DEFAULT_DB_NAME)
}

/// Format an unsigned integer with thousands separators.
#[must_use]
pub fn format_number_u64(value: u64) -> String {
    let mut out = String::with_capacity(24);

    for (idx, ch) in value.to_string().chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    out.chars().rev().collect()
}

/// Format a usize with thousands separators.
#[must_use]
pub fn format_number_usize(value: usize) -> String {
    format_number_u64(u64::try_from(value).unwrap_or(u64::MAX))
}

/// Format a datetime as a human-friendly relative string.
///
/// - < 1 minute: "just now"
/// - < 1 hour: "Nm ago"
/// - < 24 hours: "Nh ago"
/// - < 7 days: "Nd ago"
/// - Same calendar year: "Mon D"
/// - Different year: "Mon D, YYYY"
#[must_use]
pub fn format_relative_date(dt: DateTime<Utc>) -> String {
    format_relative_date_with_base(dt, Utc::now())
}

/// Format a datetime relative to a fixed base time (useful for tests).
#[must_use]
pub fn format_relative_date_with_base(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(dt);

    if duration.num_seconds() < 0 {
        return dt.format("%b %d, %Y").to_string();
    }

    let minutes = duration.num_minutes();
    let hours = duration.num_hours();
    let days = duration.num_days();

    if duration.num_seconds() < 60 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else if dt.year() == now.year() {
        dt.format("%b %d").to_string()
    } else {
        dt.format("%b %d, %Y").to_string()
    }
}

/// Relative rendering of an account timestamp, or the raw value if it
/// doesn't parse.
#[must_use]
pub fn format_account_since(timestamp: &str) -> String {
    present::parse_timestamp(timestamp)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(|| timestamp.to_string(), format_relative_date)
}

/// Escape text for CSV by sanitizing newlines and quotes.
#[must_use]
pub fn csv_escape_text(text: &str) -> String {
    text.replace('"', "\"\"").replace(['\n', '\r'], " ")
}

/// Format bytes into a human-friendly string.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes < BYTES_PER_KB {
        format!("{bytes} B")
    } else if bytes < BYTES_PER_MB {
        format_bytes_with_unit(bytes, BYTES_PER_KB, "KB")
    } else if bytes < BYTES_PER_GB {
        format_bytes_with_unit(bytes, BYTES_PER_MB, "MB")
    } else {
        format_bytes_with_unit(bytes, BYTES_PER_GB, "GB")
    }
}

fn format_bytes_with_unit(bytes: u64, unit: u64, suffix: &str) -> String {
    let whole = bytes / unit;
    let tenths = (bytes % unit) * 10 / unit;
    format!("{whole}.{tenths} {suffix}")
}
