//! Cache Module
//!
//! The public TTL cache facade plus the core pieces behind it.
//!
//! ## Responsibilities
//! - Validate keys and TTLs before they reach the storage layer
//! - Supply the default TTL for operations that omit one
//! - Delegate the six operations to [`TtlStore`]
//!
//! The facade trusts nothing; the store trusts keys the facade validated.

mod index;
mod store;

pub use store::TtlStore;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::{CacheError, Result};

/// Current wall-clock time in Unix milliseconds.
///
/// A clock before the epoch degrades to 0, which only makes entries look
/// expired sooner.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A TTL cache backed by transactional on-disk storage
///
/// All methods take `&self`; concurrency is resolved by the storage
/// engine's single-writer transactions. Mutating operations fail fast with
/// [`CacheError::WouldBlock`] under writer contention — callers own the
/// retry policy.
pub struct Cache {
    store: TtlStore,
    default_ttl: Duration,
    max_key_len: usize,
}

impl Cache {
    /// Open or create a cache as configured
    pub fn open(config: Config) -> Result<Self> {
        if config.default_ttl.is_zero() {
            return Err(CacheError::Config(
                "default TTL must be positive".to_string(),
            ));
        }
        if config.max_key_len == 0 {
            return Err(CacheError::Config(
                "maximum key length must be positive".to_string(),
            ));
        }

        let store = TtlStore::open(&config)?;
        Ok(Self {
            store,
            default_ttl: config.default_ttl,
            max_key_len: config.max_key_len,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Store `key -> value`; `ttl` defaults to the configured TTL
    pub fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.validate_key(key)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        validate_ttl(ttl)?;
        self.store.set(key, value, ttl)
    }

    /// Read `key` without touching its lifetime
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.validate_key(key)?;
        self.store.get(key, None)
    }

    /// Read `key` and extend its lifetime when found fresh;
    /// `refresh` defaults to the configured TTL
    pub fn get_touch(&self, key: &str, refresh: Option<Duration>) -> Result<Option<Vec<u8>>> {
        self.validate_key(key)?;
        let refresh = refresh.unwrap_or(self.default_ttl);
        validate_ttl(refresh)?;
        self.store.get(key, Some(refresh))
    }

    /// Remove `key`; removing an absent key succeeds
    pub fn delete(&self, key: &str) -> Result<()> {
        self.validate_key(key)?;
        self.store.delete(key)
    }

    /// Atomically move `old` to `new`, keeping the expiry.
    ///
    /// `Ok(false)` means nothing was renamed: `old` absent or expired, or
    /// `new` already taken.
    pub fn rename(&self, old: &str, new: &str) -> Result<bool> {
        self.validate_key(old)?;
        self.validate_key(new)?;
        self.store.rename(old, new)
    }

    /// Visit every fresh key in key order; see [`TtlStore::keys`]
    pub fn keys<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        self.store.keys(visit)
    }

    /// Batch-remove expired entries in expiry order; see [`TtlStore::evict`]
    pub fn evict<F>(&self, limit: Option<usize>, visit: F) -> Result<usize>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        self.store.evict(limit, visit)
    }

    /// Remove up to `limit` expired entries without a visitor
    pub fn evict_expired(&self, limit: Option<usize>) -> Result<usize> {
        self.store.evict(limit, |_| Ok(true))
    }

    /// Checkpoint and close the cache. Idempotent; operations after close
    /// fail with [`CacheError::Closed`].
    pub fn close(&self) -> Result<()> {
        match self.store.close() {
            Err(CacheError::Closed) => Ok(()),
            other => other,
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Keys are non-empty printable ASCII within the configured length.
    ///
    /// The charset restriction is load-bearing: it keeps cache keys out of
    /// the encoded-expiry keyspace in the shared index table.
    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey("key is empty".to_string()));
        }
        if key.len() > self.max_key_len {
            return Err(CacheError::InvalidKey(format!(
                "key length {} exceeds limit {}",
                key.len(),
                self.max_key_len
            )));
        }
        if let Some(bad) = key.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(CacheError::InvalidKey(format!(
                "key holds non-printable or non-ASCII character {bad:?}"
            )));
        }
        Ok(())
    }
}

fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(CacheError::Config("TTL must be positive".to_string()));
    }
    Ok(())
}
