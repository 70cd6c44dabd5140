//! Error types for ttlkv
//!
//! Provides a unified error type for all operations.
//!
//! Logical outcomes that are not faults (key not found on get/delete,
//! target-exists on rename) are expressed as `Ok` values by the cache
//! operations, never as variants here.

use thiserror::Error;

/// Result type alias using CacheError
pub type Result<T> = std::result::Result<T, CacheError>;

/// Unified error type for ttlkv operations
#[derive(Debug, Error)]
pub enum CacheError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("engine error: {0}")]
    Engine(String),

    #[error("transaction would block: another writer holds the write lock")]
    WouldBlock,

    #[error("environment is closed")]
    Closed,

    #[error("key already exists")]
    AlreadyExists,

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("index corruption in table '{table}': key '{key}' has no valid index entry")]
    IndexCorruption { table: String, key: String },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // -------------------------------------------------------------------------
    // Configuration / Validation Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl CacheError {
    /// Whether the operation may simply be retried.
    ///
    /// Only lock contention from a non-blocking transaction qualifies;
    /// every other variant indicates a fault the caller must handle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::WouldBlock)
    }
}
