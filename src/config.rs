//! Configuration for ttlkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a ttlkv cache instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── commit.log       (redo records, one per committed transaction)
    ///     └── checkpoint.db    (full-table snapshot, rewritten on close)
    pub data_dir: PathBuf,

    /// Whether the commit log is fsynced after every committed transaction.
    /// Turning this off trades durability of the most recent commits for
    /// write throughput.
    pub sync_on_commit: bool,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// TTL applied when an operation does not supply one explicitly
    pub default_ttl: Duration,

    /// Maximum accepted key length (in bytes)
    pub max_key_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./ttlkv_data"),
            sync_on_commit: true,
            default_ttl: Duration::from_secs(60),
            max_key_len: 512,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set whether commits fsync the log before returning
    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.config.sync_on_commit = sync;
        self
    }

    /// Set the default TTL for entries written without an explicit one
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Set the maximum accepted key length (in bytes)
    pub fn max_key_len(mut self, len: usize) -> Self {
        self.config.max_key_len = len;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
