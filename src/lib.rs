//! # ttlkv
//!
//! An embedded TTL cache on top of a transactional, ordered key-value
//! store, with:
//! - A dual-table design: a primary key→value table and a secondary
//!   expiry index kept in lockstep
//! - Lazy expiry on read plus proactive, expiry-ordered batch eviction
//! - Atomic rename carrying the expiry along
//! - Single-writer/multi-reader transactions with a non-blocking "try"
//!   mode for all mutations
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Cache (facade)                         │
//! │              key/TTL validation, default TTL                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        TtlStore                              │
//! │    set / get / delete / rename / keys / evict                │
//! │    one transaction per operation, expiry index upkeep        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  "kv" table │          │ "ttl" table │
//!   │ key → value │          │ key ⇄ expiry│
//!   └──────┬──────┘          └──────┬──────┘
//!          │                         │
//!          └────────────┬────────────┘
//!                       ▼
//!               ┌──────────────┐
//!               │  Environment │
//!               │ (txn, log,   │
//!               │  checkpoint) │
//!               └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod engine;
pub mod cache;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cache::{Cache, TtlStore};
pub use config::{Config, ConfigBuilder};
pub use engine::{Cursor, DupCursor, Environment, TableId, Transaction, TxnMode};
pub use error::{CacheError, Result};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ttlkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
