//! Storage Engine Module
//!
//! An ordered, transactional, dual-table storage engine: the substrate the
//! TTL cache runs on.
//!
//! ## Responsibilities
//! - Own the on-disk environment (tables, commit log, checkpoint)
//! - Single-writer/multi-reader transactions with a non-blocking "try" mode
//! - Atomic commit/abort spanning every table a transaction touched
//! - Crash recovery by replaying the commit log over the last checkpoint
//!
//! The cache layer (`crate::cache`) only ever talks to this module through
//! [`Environment::begin`] and the [`Transaction`] surface.

mod env;
mod log;
mod txn;

pub use env::{Environment, TableId};
pub use log::RecoveryStats;
pub use txn::{Cursor, DupCursor, Transaction, TxnMode};
