//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldsync_common::{Error, Result};
use fieldsync_remote::HttpConfig;
use fieldsync_storage::DEFAULT_HISTORY_CAPACITY;

use crate::retry::RetryConfig;

/// Configuration for the sync engine, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database holding the queue and sync metadata.
    pub database_path: PathBuf,
    /// Remote backend settings.
    pub remote: HttpConfig,
    /// Number of sync runs kept in history.
    pub history_capacity: usize,
    /// Automatic retry policy.
    pub retry: RetryConfig,
    /// Seconds between reachability probes while running.
    pub probe_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            remote: HttpConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            retry: RetryConfig::default(),
            probe_interval_secs: 15,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid configuration JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write configuration to a JSON file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(Error::Config("history_capacity must be at least 1".to_string()));
        }
        if self.remote.request_timeout_secs == 0 {
            return Err(Error::Config(
                "remote.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.probe_interval_secs == 0 {
            return Err(Error::Config("probe_interval_secs must be at least 1".to_string()));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        self.remote.request_timeout()
    }
}

/// Default database location in the platform data directory.
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join("queue.db")
}
