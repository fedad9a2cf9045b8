//! Configuration system for followback.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - Sensible defaults built into the binary
//! 2. **User config file** - `~/.config/followback/config.toml`
//! 3. **Environment variables** - `FOLLOWBACK_*` prefix
//! 4. **CLI arguments** - Highest priority, always wins
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/followback/followback.db"
//!
//! [storage]
//! key_prefix = "followback_"
//! quota_bytes = 5242880
//! analysis_max_age_hours = 24
//! whitelist_max_age_days = 365
//!
//! [extract]
//! profile_base_url = "https://www.instagram.com/"
//! chunk_size = 500
//!
//! [output]
//! format = "text"
//! colors = true
//! ```

use crate::chunked::DEFAULT_CHUNK_SIZE;
use crate::engine::{DEFAULT_KEY_PREFIX, EngineOptions};
use crate::error::{FollowbackError, Result};
use crate::extract::ExtractConfig;
use crate::sanitize::DEFAULT_PROFILE_BASE_URL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure for followback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path-related configuration.
    pub paths: PathsConfig,
    /// Record storage configuration.
    pub storage: StorageConfig,
    /// Export document extraction configuration.
    pub extract: ExtractSettings,
    /// Output formatting configuration.
    pub output: OutputConfig,
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the durable `SQLite` database file.
    /// Environment variable: `FOLLOWBACK_DB`
    pub db: Option<PathBuf>,
}

/// Record storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Prefix applied to every record key.
    pub key_prefix: String,

    /// Byte quota for the durable and session tiers; unset means unbounded.
    /// Environment variable: `FOLLOWBACK_QUOTA_BYTES`
    pub quota_bytes: Option<u64>,

    /// How long a cached analysis stays valid.
    pub analysis_max_age_hours: u64,

    /// How long the whitelist survives without being touched.
    pub whitelist_max_age_days: u64,
}

/// Export document extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    /// Base used to synthesize profile URLs.
    pub profile_base_url: String,

    /// Accounts processed between cooperative yield points.
    /// Environment variable: `FOLLOWBACK_CHUNK_SIZE`
    pub chunk_size: usize,
}

/// Output formatting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format: text, json, json-pretty, csv.
    pub format: String,

    /// Enable colored output.
    pub colors: bool,

    /// Suppress non-essential output (progress spinners, warnings).
    pub quiet: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            quota_bytes: None,
            analysis_max_age_hours: 24,
            whitelist_max_age_days: 365,
        }
    }
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            profile_base_url: DEFAULT_PROFILE_BASE_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            colors: true,
            quiet: false,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. User config file (~/.config/followback/config.toml)
    /// 3. Compiled defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        config.apply_env_overrides(|name| std::env::var(name).ok());

        debug!("Configuration loaded: {:?}", config);
        config
    }

    /// Load configuration from a specific file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`FollowbackError::PathError`] if the file cannot be read and
    /// [`FollowbackError::ConfigError`] if it is not valid configuration TOML.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| FollowbackError::path_error("read", path, e))?;
        let config =
            toml::from_str(&content).map_err(|e| FollowbackError::config(path, e.to_string()))?;
        info!("Loaded config from: {}", path.display());
        Ok(Some(config))
    }

    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring config file: {e}");
                None
            }
        }
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("followback").join("config.toml"))
    }

    /// Apply `FOLLOWBACK_*` overrides read through `var`.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(db) = var("FOLLOWBACK_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }
        if let Some(quota) = var("FOLLOWBACK_QUOTA_BYTES") {
            match quota.parse() {
                Ok(n) => self.storage.quota_bytes = Some(n),
                Err(_) => warn!("Ignoring invalid FOLLOWBACK_QUOTA_BYTES: {quota}"),
            }
        }
        if let Some(chunk) = var("FOLLOWBACK_CHUNK_SIZE") {
            if let Ok(n) = chunk.parse() {
                self.extract.chunk_size = n;
            }
        }

        if let Some(format) = var("FOLLOWBACK_FORMAT") {
            self.output.format = format;
        }
        if var("FOLLOWBACK_NO_COLOR").is_some() || var("NO_COLOR").is_some() {
            self.output.colors = false;
        }
        if var("FOLLOWBACK_QUIET").is_some() {
            self.output.quiet = true;
        }
    }

    /// Merge another config into this one (other takes precedence).
    fn merge(&mut self, other: Self) {
        if other.paths.db.is_some() {
            self.paths.db = other.paths.db;
        }

        self.storage.key_prefix = other.storage.key_prefix;
        if other.storage.quota_bytes.is_some() {
            self.storage.quota_bytes = other.storage.quota_bytes;
        }
        self.storage.analysis_max_age_hours = other.storage.analysis_max_age_hours;
        self.storage.whitelist_max_age_days = other.storage.whitelist_max_age_days;

        self.extract.profile_base_url = other.extract.profile_base_url;
        self.extract.chunk_size = other.extract.chunk_size;

        self.output.format = other.output.format;
        self.output.colors = other.output.colors;
        self.output.quiet = other.output.quiet;
    }

    /// Get the database path, using defaults if not configured.
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .clone()
            .unwrap_or_else(crate::default_db_path)
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            key_prefix: self.storage.key_prefix.clone(),
            analysis_max_age: Duration::from_secs(
                self.storage.analysis_max_age_hours.saturating_mul(60 * 60),
            ),
            whitelist_max_age: Duration::from_secs(
                self.storage.whitelist_max_age_days.saturating_mul(24 * 60 * 60),
            ),
            chunk_size: self.extract.chunk_size,
            extract: ExtractConfig {
                profile_base_url: self.extract.profile_base_url.clone(),
                ..ExtractConfig::default()
            },
        }
    }

    /// Save the current configuration to the user config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined,
    /// the parent directory cannot be created, or the file cannot be written.
    pub fn save(&self) -> std::io::Result<()> {
        let config_path = Self::user_config_path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            )
        })?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&config_path, content)?;
        info!("Saved config to: {}", config_path.display());
        Ok(())
    }

    /// Generate a default configuration file content.
    #[must_use]
    pub fn default_config_content() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
