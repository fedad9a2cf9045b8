//! Custom error types for followback.
//!
//! The core pipeline degrades instead of failing, so these errors mostly
//! travel between storage backends, the archive reader and the CLI shell.
//! Conditions a caller should merely be told about are modeled as warning
//! values ([`crate::tiers::StorageWarning`], [`crate::engine::EngineWarning`]),
//! not here.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for followback operations.
#[derive(Error, Debug)]
pub enum FollowbackError {
    // =========================================================================
    // Archive Errors
    // =========================================================================
    /// Archive file or directory not found at the specified path.
    #[error("Archive not found at '{path}'")]
    ArchiveNotFound { path: PathBuf },

    /// Path exists but is neither a directory nor a zip file.
    #[error("Unsupported archive '{path}': {reason}")]
    UnsupportedArchive { path: PathBuf, reason: String },

    /// Zip container could not be read.
    #[error("Zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Backend refused to operate (probe failed, backend closed).
    #[error("Storage tier '{tier}' is unavailable: {reason}")]
    StorageUnavailable { tier: &'static str, reason: String },

    /// A write would exceed the backend's byte quota.
    #[error("Storage quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
    QuotaExceeded { needed: u64, quota: u64 },

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The remote whitelist store could not be reached or answered badly.
    #[error("Remote whitelist error: {reason}")]
    RemoteError { reason: String },

    // =========================================================================
    // IO Errors
    // =========================================================================
    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Path-specific IO error with context.
    #[error("Failed to {operation} '{path}': {source}")]
    PathError {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigError { path: PathBuf, reason: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Catch-all for other errors with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type alias for followback operations.
pub type Result<T> = std::result::Result<T, FollowbackError>;

impl FollowbackError {
    /// Create an archive not found error.
    pub fn archive_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ArchiveNotFound { path: path.into() }
    }

    /// Create an unsupported archive error.
    pub fn unsupported_archive(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnsupportedArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage unavailable error.
    pub fn storage_unavailable(tier: &'static str, reason: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            tier,
            reason: reason.into(),
        }
    }

    /// Create a remote error.
    pub fn remote(reason: impl Into<String>) -> Self {
        Self::RemoteError {
            reason: reason.into(),
        }
    }

    /// Create a path error with context.
    pub fn path_error(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::PathError {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Wrap an error with additional context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Create a configuration error.
    pub fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Ways to fix this error, most likely first. Empty when there is no advice.
    #[must_use]
    pub const fn suggestions(&self) -> &'static [&'static str] {
        match self {
            Self::ArchiveNotFound { .. } => {
                &["Verify the path points at your extracted export or its .zip file."]
            }
            Self::UnsupportedArchive { .. } => &[
                "Pass the export directory or the .zip file you downloaded.",
                "Re-download the export if the zip is damaged or too large.",
            ],
            Self::QuotaExceeded { .. } => &[
                "Raise storage.quota_bytes in the config file.",
                "Run 'followback reset' to drop the cached analysis.",
            ],
            Self::ConfigError { .. } => &[
                "Fix the TOML syntax or field types in the config file.",
                "Delete the file and run 'followback config --init' for fresh defaults.",
            ],
            Self::RemoteError { .. } => &["Check the remote whitelist location and retry."],
            _ => &[],
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FollowbackError::with_context(context, e))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FollowbackError::with_context(f(), e))
    }
}

// =============================================================================
// CLI Error Formatting
// =============================================================================

use colored::Colorize;

/// Format a structured CLI error with explanation and suggestions.
#[must_use]
pub fn format_error(title: &str, explanation: &str, suggestions: &[&str]) -> String {
    use std::fmt::Write;

    let mut output = format!("{} {}", "✗".red().bold(), title.bold());

    if !explanation.is_empty() {
        let _ = write!(output, "\n\n   {explanation}");
    }

    if !suggestions.is_empty() {
        output.push_str("\n\n   ");
        if suggestions.len() == 1 {
            let _ = write!(output, "{} {}", "Hint:".cyan(), suggestions[0]);
        } else {
            let _ = write!(output, "{}:", "Try".cyan());
            for suggestion in suggestions {
                let _ = write!(output, "\n     {} {}", "•".dimmed(), suggestion);
            }
        }
    }

    output
}
