//! Data models for relationship analysis.
//!
//! These structures are what the extractor produces, what the analyzer
//! returns and what gets persisted in the record store. Field names are
//! serialized in camelCase so persisted records stay readable by other
//! tools that consume the same layout.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One account found in an export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Display casing as first seen. Compare through [`Account::key`].
    pub username: String,
    pub profile_url: String,
    /// RFC 3339 string, or whatever time-like value the export carried.
    pub timestamp: String,
}

impl Account {
    pub fn new(
        username: impl Into<String>,
        profile_url: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            profile_url: profile_url.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Case-insensitive identity of this account.
    #[must_use]
    pub fn key(&self) -> String {
        username_key(&self.username)
    }
}

/// Lowercased form used for every username comparison.
#[must_use]
pub fn username_key(username: &str) -> String {
    username.to_lowercase()
}

/// Ascending username order: case-insensitive first, raw value as tiebreaker.
#[must_use]
pub fn compare_usernames(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Which side of the relationship an export document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Followers,
    Following,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Followers => write!(f, "followers"),
            Self::Following => write!(f, "following"),
        }
    }
}

/// Summary counts for one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub followers_count: usize,
    pub following_count: usize,
    pub not_following_back_count: usize,
    pub mutual_count: usize,
    /// `following / followers`, 0 when there are no followers.
    pub ratio: f64,
}

impl Stats {
    /// Compute stats from already deduplicated list lengths.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_counts(followers: usize, following: usize, not_following_back: usize) -> Self {
        let ratio = if followers == 0 {
            0.0
        } else {
            following as f64 / followers as f64
        };
        Self {
            followers_count: followers,
            following_count: following,
            not_following_back_count: not_following_back,
            mutual_count: following.saturating_sub(not_following_back),
            ratio,
        }
    }

    /// Ratio rendered with two decimals, e.g. `1.00`.
    #[must_use]
    pub fn ratio_display(&self) -> String {
        format!("{:.2}", self.ratio)
    }
}

/// Output of one extraction and analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub followers: Vec<Account>,
    pub following: Vec<Account>,
    pub not_following_back: Vec<Account>,
    pub stats: Stats,
}

/// Ordering applied inside each whitelist partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Username,
    Newest,
    Oldest,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username => write!(f, "username"),
            Self::Newest => write!(f, "newest"),
            Self::Oldest => write!(f, "oldest"),
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "username" | "name" => Ok(Self::Username),
            "newest" | "new" => Ok(Self::Newest),
            "oldest" | "old" => Ok(Self::Oldest),
            _ => Err(format!("Invalid sort key: {s}")),
        }
    }
}
