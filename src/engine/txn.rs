//! Transactions
//!
//! A transaction is the only way to read or mutate tables. Mutations are
//! applied in place under the environment's exclusive writer lock while an
//! undo log accumulates; `commit` appends one redo record to the commit log,
//! `abort` (or dropping the transaction) replays the undo log in reverse.
//!
//! ## Modes
//! - `Write`: blocks until the writer lock is available
//! - `Try`: fails immediately with `WouldBlock` if a writer is active
//! - `ReadOnly`: shared lock; rejects every mutating call
//!
//! All table and cursor access is scoped to the transaction's lifetime;
//! nothing can be retained past commit/abort because handles borrow the
//! transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::error::{CacheError, Result};

use super::env::{EnvInner, Environment, Table, TableData, TableId};
use super::log::LogOp;

/// Transaction acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Exclusive writer, waits for the lock
    Write,

    /// Shared reader, never conflicts with other readers
    ReadOnly,

    /// Exclusive writer, fails with `WouldBlock` instead of waiting
    Try,
}

/// Lock guard held for the transaction's lifetime
pub(crate) enum TxnGuard<'env> {
    Read(RwLockReadGuard<'env, EnvInner>),
    Write(RwLockWriteGuard<'env, EnvInner>),
}

/// Inverse of one applied mutation, for rollback
enum UndoOp {
    Upsert {
        table: u32,
        key: Vec<u8>,
        prev: Option<Vec<u8>>,
    },
    Delete {
        table: u32,
        key: Vec<u8>,
        prev: Vec<u8>,
    },
    DupPut {
        table: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    DupDelete {
        table: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    CreateTable,
}

/// An open transaction
///
/// Dropping a transaction without committing rolls it back.
pub struct Transaction<'env> {
    env: &'env Environment,
    guard: TxnGuard<'env>,
    undo: Vec<UndoOp>,
    redo: Vec<LogOp>,
    done: bool,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("is_write", &self.is_write())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'env> Transaction<'env> {
    pub(crate) fn new(env: &'env Environment, guard: TxnGuard<'env>) -> Self {
        Self {
            env,
            guard,
            undo: Vec::new(),
            redo: Vec::new(),
            done: false,
        }
    }

    /// Whether this transaction holds the exclusive writer lock
    pub fn is_write(&self) -> bool {
        matches!(self.guard, TxnGuard::Write(_))
    }

    pub(crate) fn inner(&self) -> &EnvInner {
        match &self.guard {
            TxnGuard::Read(guard) => guard,
            TxnGuard::Write(guard) => guard,
        }
    }

    // =========================================================================
    // Table Declaration
    // =========================================================================

    /// Look up a table by name, creating it when `create` is set.
    ///
    /// The `dup` flag selects a duplicate-allowing multi-map and must match
    /// the existing declaration on reopen.
    pub fn declare_table(&mut self, name: &str, create: bool, dup: bool) -> Result<TableId> {
        let max_tables = self.env.max_tables();
        let (inner, undo, redo) = self.write_parts()?;

        if let Some(idx) = inner.tables.iter().position(|t| t.name == name) {
            if inner.tables[idx].data.is_dup() != dup {
                return Err(CacheError::Engine(format!(
                    "table '{name}' exists with a different duplicate-value setting"
                )));
            }
            return Ok(TableId(idx as u32));
        }

        if !create {
            return Err(CacheError::Engine(format!("table '{name}' does not exist")));
        }
        if inner.tables.len() >= max_tables {
            return Err(CacheError::Engine(format!(
                "cannot create table '{name}': environment is limited to {max_tables} table(s)"
            )));
        }

        inner.tables.push(Table {
            name: name.to_string(),
            data: if dup {
                TableData::Dup(BTreeSet::new())
            } else {
                TableData::Plain(BTreeMap::new())
            },
        });
        undo.push(UndoOp::CreateTable);
        redo.push(LogOp::CreateTable {
            name: name.to_string(),
            dup,
        });

        Ok(TableId((inner.tables.len() - 1) as u32))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get the value stored under `key`.
    ///
    /// For dup tables this returns the smallest value under the key.
    pub fn get(&self, table: TableId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.table(table)?.data {
            TableData::Plain(map) => Ok(map.get(key).cloned()),
            TableData::Dup(set) => {
                let from = (key.to_vec(), Vec::new());
                Ok(set
                    .range(from..)
                    .next()
                    .filter(|(k, _)| k == key)
                    .map(|(_, v)| v.clone()))
            }
        }
    }

    // =========================================================================
    // Plain-Table Mutations
    // =========================================================================

    /// Insert or replace `key -> value`
    pub fn upsert(&mut self, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        let (inner, undo, redo) = self.write_parts()?;
        let map = plain_table_mut(inner, table)?;

        let prev = map.insert(key.to_vec(), value.to_vec());
        undo.push(UndoOp::Upsert {
            table: table.0,
            key: key.to_vec(),
            prev,
        });
        redo.push(LogOp::Upsert {
            table: table.0,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Insert `key -> value`, failing with [`CacheError::AlreadyExists`]
    /// when the key is present.
    pub fn insert_if_absent(&mut self, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        let (inner, undo, redo) = self.write_parts()?;
        let map = plain_table_mut(inner, table)?;

        if map.contains_key(key) {
            return Err(CacheError::AlreadyExists);
        }
        map.insert(key.to_vec(), value.to_vec());
        undo.push(UndoOp::Upsert {
            table: table.0,
            key: key.to_vec(),
            prev: None,
        });
        redo.push(LogOp::Upsert {
            table: table.0,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Remove `key`; returns whether it was present
    pub fn delete(&mut self, table: TableId, key: &[u8]) -> Result<bool> {
        let (inner, undo, redo) = self.write_parts()?;
        let map = plain_table_mut(inner, table)?;

        match map.remove(key) {
            Some(prev) => {
                undo.push(UndoOp::Delete {
                    table: table.0,
                    key: key.to_vec(),
                    prev,
                });
                redo.push(LogOp::Delete {
                    table: table.0,
                    key: key.to_vec(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // =========================================================================
    // Dup-Table Mutations
    // =========================================================================

    /// Insert the pair `(key, value)`; inserting an existing pair is a no-op
    pub fn put_dup(&mut self, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        let (inner, undo, redo) = self.write_parts()?;
        let set = dup_table_mut(inner, table)?;

        if set.insert((key.to_vec(), value.to_vec())) {
            undo.push(UndoOp::DupPut {
                table: table.0,
                key: key.to_vec(),
                value: value.to_vec(),
            });
            redo.push(LogOp::DupPut {
                table: table.0,
                key: key.to_vec(),
                value: value.to_vec(),
            });
        }
        Ok(())
    }

    /// Remove the specific pair `(key, value)`; returns whether it existed
    pub fn delete_dup(&mut self, table: TableId, key: &[u8], value: &[u8]) -> Result<bool> {
        let (inner, undo, redo) = self.write_parts()?;
        let set = dup_table_mut(inner, table)?;

        if set.remove(&(key.to_vec(), value.to_vec())) {
            undo.push(UndoOp::DupDelete {
                table: table.0,
                key: key.to_vec(),
                value: value.to_vec(),
            });
            redo.push(LogOp::DupDelete {
                table: table.0,
                key: key.to_vec(),
                value: value.to_vec(),
            });
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Commit: append one redo record covering every touched table.
    ///
    /// A transaction that mutated nothing commits without logging.
    /// If the log append fails the transaction is rolled back and the
    /// failure is returned.
    pub fn commit(mut self) -> Result<()> {
        if self.redo.is_empty() {
            self.done = true;
            return Ok(());
        }

        // Still holding the writer guard here, so record order in the log
        // matches the order mutations became visible.
        let appended = {
            let mut log = self.env.log_handle().lock();
            log.append(&self.redo).map(|_| ())
        };

        match appended {
            Ok(()) => {
                self.done = true;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                self.done = true;
                Err(e)
            }
        }
    }

    /// Abort: revert every mutation made by this transaction
    pub fn abort(mut self) {
        self.rollback();
        self.done = true;
    }

    fn rollback(&mut self) {
        let inner = match &mut self.guard {
            TxnGuard::Write(guard) => &mut **guard,
            TxnGuard::Read(_) => return,
        };

        while let Some(op) = self.undo.pop() {
            match op {
                UndoOp::Upsert { table, key, prev } => {
                    if let Ok(map) = plain_table_mut(inner, TableId(table)) {
                        match prev {
                            Some(value) => map.insert(key, value),
                            None => map.remove(&key),
                        };
                    }
                }
                UndoOp::Delete { table, key, prev } => {
                    if let Ok(map) = plain_table_mut(inner, TableId(table)) {
                        map.insert(key, prev);
                    }
                }
                UndoOp::DupPut { table, key, value } => {
                    if let Ok(set) = dup_table_mut(inner, TableId(table)) {
                        set.remove(&(key, value));
                    }
                }
                UndoOp::DupDelete { table, key, value } => {
                    if let Ok(set) = dup_table_mut(inner, TableId(table)) {
                        set.insert((key, value));
                    }
                }
                UndoOp::CreateTable => {
                    inner.tables.pop();
                }
            }
        }
        self.redo.clear();
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn table(&self, id: TableId) -> Result<&Table> {
        self.inner()
            .tables
            .get(id.0 as usize)
            .ok_or_else(|| CacheError::Engine(format!("unknown table id {}", id.0)))
    }

    /// Split into (tables, undo log, redo log) for a mutation.
    ///
    /// Fails on read-only transactions.
    fn write_parts(&mut self) -> Result<(&mut EnvInner, &mut Vec<UndoOp>, &mut Vec<LogOp>)> {
        let Self { guard, undo, redo, .. } = self;
        match guard {
            TxnGuard::Write(g) => Ok((&mut **g, undo, redo)),
            TxnGuard::Read(_) => Err(CacheError::Engine(
                "mutation attempted in a read-only transaction".to_string(),
            )),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.rollback();
        }
    }
}

fn plain_table_mut(inner: &mut EnvInner, id: TableId) -> Result<&mut BTreeMap<Vec<u8>, Vec<u8>>> {
    match inner.tables.get_mut(id.0 as usize).map(|t| &mut t.data) {
        Some(TableData::Plain(map)) => Ok(map),
        Some(TableData::Dup(_)) => Err(CacheError::Engine(format!(
            "table {} allows duplicates; plain-table operation rejected",
            id.0
        ))),
        None => Err(CacheError::Engine(format!("unknown table id {}", id.0))),
    }
}

fn dup_table_mut(inner: &mut EnvInner, id: TableId) -> Result<&mut BTreeSet<(Vec<u8>, Vec<u8>)>> {
    match inner.tables.get_mut(id.0 as usize).map(|t| &mut t.data) {
        Some(TableData::Dup(set)) => Ok(set),
        Some(TableData::Plain(_)) => Err(CacheError::Engine(format!(
            "table {} is plain; dup-table operation rejected",
            id.0
        ))),
        None => Err(CacheError::Engine(format!("unknown table id {}", id.0))),
    }
}

// =============================================================================
// Cursors
// =============================================================================

/// Ascending cursor over a plain table.
///
/// The cursor is a re-seeking bookmark: each `next` call resumes strictly
/// after the last returned key, so deleting entries at or behind the cursor
/// position is safe.
pub struct Cursor {
    table: TableId,
    pos: Option<Vec<u8>>,
}

impl Cursor {
    pub fn new(table: TableId) -> Self {
        Self { table, pos: None }
    }

    /// Advance and return the next entry in key order
    pub fn next(&mut self, txn: &Transaction<'_>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let table = txn
            .inner()
            .tables
            .get(self.table.0 as usize)
            .ok_or_else(|| CacheError::Engine(format!("unknown table id {}", self.table.0)))?;

        let map = match &table.data {
            TableData::Plain(map) => map,
            TableData::Dup(_) => {
                return Err(CacheError::Engine(format!(
                    "table {} allows duplicates; use DupCursor",
                    self.table.0
                )))
            }
        };

        let entry = match &self.pos {
            None => map.iter().next(),
            Some(last) => map
                .range::<Vec<u8>, _>((Bound::Excluded(last), Bound::Unbounded))
                .next(),
        };

        match entry {
            Some((k, v)) => {
                self.pos = Some(k.clone());
                Ok(Some((k.clone(), v.clone())))
            }
            None => Ok(None),
        }
    }
}

/// Ascending cursor over a dup table, yielding `(key, value)` pairs in
/// `(key, value)` order. Same re-seeking bookmark semantics as [`Cursor`].
pub struct DupCursor {
    table: TableId,
    pos: Option<(Vec<u8>, Vec<u8>)>,
}

impl DupCursor {
    pub fn new(table: TableId) -> Self {
        Self { table, pos: None }
    }

    /// Advance and return the next pair
    pub fn next(&mut self, txn: &Transaction<'_>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let table = txn
            .inner()
            .tables
            .get(self.table.0 as usize)
            .ok_or_else(|| CacheError::Engine(format!("unknown table id {}", self.table.0)))?;

        let set = match &table.data {
            TableData::Dup(set) => set,
            TableData::Plain(_) => {
                return Err(CacheError::Engine(format!(
                    "table {} is plain; use Cursor",
                    self.table.0
                )))
            }
        };

        let entry = match &self.pos {
            None => set.iter().next(),
            Some(last) => set
                .range::<(Vec<u8>, Vec<u8>), _>((Bound::Excluded(last), Bound::Unbounded))
                .next(),
        };

        match entry {
            Some(pair) => {
                self.pos = Some(pair.clone());
                Ok(Some(pair.clone()))
            }
            None => Ok(None),
        }
    }
}
