//! Environment
//!
//! Owns the on-disk state of the storage engine: the in-memory ordered
//! tables, the commit log, and the checkpoint snapshot.
//!
//! ## Responsibilities
//! - Open/create the data directory and recover state on startup
//! - Hand out transactions (`begin`) under the single-writer lock
//! - Checkpoint all tables atomically (temp file + rename) and truncate
//!   the commit log on close
//! - Fail cleanly once closed
//!
//! ## Startup
//! 1. Load the checkpoint snapshot, if any
//! 2. Replay the commit log on top of it, discarding a corrupt tail
//! 3. If anything was replayed, checkpoint immediately and truncate the log
//!    so recovered data is durable in one place

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CacheError, Result};

use super::log::{self, CommitLog, LogOp};
use super::txn::{Transaction, TxnGuard, TxnMode};

/// Identifies a declared table within an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableId(pub(crate) u32);

/// Contents of one table
pub(crate) enum TableData {
    /// Unique keys, ordered by key
    Plain(BTreeMap<Vec<u8>, Vec<u8>>),

    /// Duplicate-allowing multi-map, ordered by (key, value)
    Dup(BTreeSet<(Vec<u8>, Vec<u8>)>),
}

impl TableData {
    pub(crate) fn is_dup(&self) -> bool {
        matches!(self, TableData::Dup(_))
    }

    fn new(dup: bool) -> Self {
        if dup {
            TableData::Dup(BTreeSet::new())
        } else {
            TableData::Plain(BTreeMap::new())
        }
    }
}

/// A declared table
pub(crate) struct Table {
    pub(crate) name: String,
    pub(crate) data: TableData,
}

/// Shared mutable state, guarded by the environment's RwLock
pub(crate) struct EnvInner {
    pub(crate) tables: Vec<Table>,
}

/// The transactional environment
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - Write and Try transactions take the exclusive side of `inner`;
///   Try uses `try_write` and fails with [`CacheError::WouldBlock`]
///   instead of waiting.
/// - ReadOnly transactions take the shared side and never block each other.
/// - The commit log has its own mutex; it is only touched while the writer
///   guard is still held, so record order matches apply order.
pub struct Environment {
    inner: RwLock<EnvInner>,
    log: Mutex<CommitLog>,
    path: PathBuf,
    max_tables: usize,
    closed: AtomicBool,
}

impl Environment {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LOG_FILENAME: &'static str = "commit.log";
    const CHECKPOINT_FILENAME: &'static str = "checkpoint.db";
    const CHECKPOINT_TMP: &'static str = "checkpoint.tmp";

    /// Open or create an environment at `path`, holding at most
    /// `max_tables` tables.
    pub fn open(path: impl Into<PathBuf>, max_tables: usize, sync_on_commit: bool) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;

        // Step 1: Load the checkpoint, if present
        let mut inner = match Self::load_checkpoint(&path)? {
            Some(inner) => inner,
            None => EnvInner { tables: Vec::new() },
        };

        // Step 2: Replay the commit log on top of it
        let log_path = path.join(Self::LOG_FILENAME);
        let (records, stats) = log::replay(&log_path)?;
        for ops in &records {
            for op in ops {
                apply_op(&mut inner, op)?;
            }
        }
        if stats.records_applied > 0 || stats.records_corrupted > 0 {
            info!(
                records_applied = stats.records_applied,
                records_corrupted = stats.records_corrupted,
                last_lsn = stats.last_lsn,
                "commit log recovery complete"
            );
        }

        let mut log = CommitLog::open(&log_path, sync_on_commit, stats.last_lsn + 1)?;

        // Step 3: Make recovered data durable in the checkpoint, then drop
        // the replayed records from the log
        if stats.records_applied > 0 {
            Self::write_checkpoint(&path, &inner)?;
            log.truncate()?;
        }

        Ok(Self {
            inner: RwLock::new(inner),
            log: Mutex::new(log),
            path,
            max_tables,
            closed: AtomicBool::new(false),
        })
    }

    /// Begin a transaction in the given mode
    pub fn begin(&self, mode: TxnMode) -> Result<Transaction<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }

        let guard = match mode {
            TxnMode::ReadOnly => TxnGuard::Read(self.inner.read()),
            TxnMode::Write => TxnGuard::Write(self.inner.write()),
            TxnMode::Try => match self.inner.try_write() {
                Some(guard) => TxnGuard::Write(guard),
                None => return Err(CacheError::WouldBlock),
            },
        };

        // Re-check after acquiring the guard: a begin that passed the first
        // check may have been blocked on the lock while close ran.
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }

        Ok(Transaction::new(self, guard))
    }

    /// Checkpoint all tables and release engine resources.
    ///
    /// Subsequent `begin`/`close` calls fail with [`CacheError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::Closed);
        }

        let inner = self.inner.write();
        Self::write_checkpoint(&self.path, &inner)?;
        self.log.lock().truncate()?;
        info!(path = %self.path.display(), "environment closed");
        Ok(())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Verify commit-log integrity at `path` without opening the environment
    pub fn verify(path: &Path) -> Result<log::RecoveryStats> {
        log::verify(&path.join(Self::LOG_FILENAME))
    }

    /// The data directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Crate-internal accessors (used by transactions)
    // =========================================================================

    pub(crate) fn log_handle(&self) -> &Mutex<CommitLog> {
        &self.log
    }

    pub(crate) fn max_tables(&self) -> usize {
        self.max_tables
    }

    // =========================================================================
    // Checkpointing
    // =========================================================================

    /// Write a full snapshot of all tables, atomically via rename.
    ///
    /// File layout: CRC32 (4) | payload length (8) | bincode payload.
    fn write_checkpoint(dir: &Path, inner: &EnvInner) -> Result<()> {
        let snapshots: Vec<TableSnapshot> = inner
            .tables
            .iter()
            .map(|table| TableSnapshot {
                name: table.name.clone(),
                dup: table.data.is_dup(),
                entries: match &table.data {
                    TableData::Plain(map) => {
                        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                    }
                    TableData::Dup(set) => set.iter().cloned().collect(),
                },
            })
            .collect();

        let payload = bincode::serialize(&snapshots)?;
        let crc = crc32fast::hash(&payload);

        let tmp_path = dir.join(Self::CHECKPOINT_TMP);
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&crc.to_le_bytes())?;
        file.write_all(&(payload.len() as u64).to_le_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, dir.join(Self::CHECKPOINT_FILENAME))?;
        Ok(())
    }

    /// Load the checkpoint snapshot, if one exists
    fn load_checkpoint(dir: &Path) -> Result<Option<EnvInner>> {
        let path = dir.join(Self::CHECKPOINT_FILENAME);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < 12 {
            return Err(CacheError::Corruption(format!(
                "checkpoint {} is truncated ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }

        let mut crc_raw = [0u8; 4];
        crc_raw.copy_from_slice(&bytes[0..4]);
        let mut len_raw = [0u8; 8];
        len_raw.copy_from_slice(&bytes[4..12]);
        let crc = u32::from_le_bytes(crc_raw);
        let len = u64::from_le_bytes(len_raw) as usize;

        if bytes.len() - 12 < len {
            return Err(CacheError::Corruption(format!(
                "checkpoint {} is truncated (payload wants {} bytes, has {})",
                path.display(),
                len,
                bytes.len() - 12
            )));
        }

        let payload = &bytes[12..12 + len];
        if crc32fast::hash(payload) != crc {
            return Err(CacheError::Corruption(format!(
                "checkpoint {} failed checksum validation",
                path.display()
            )));
        }

        let snapshots: Vec<TableSnapshot> = bincode::deserialize(payload)?;
        let tables = snapshots
            .into_iter()
            .map(|snap| Table {
                name: snap.name,
                data: if snap.dup {
                    TableData::Dup(snap.entries.into_iter().collect())
                } else {
                    TableData::Plain(snap.entries.into_iter().collect())
                },
            })
            .collect();

        Ok(Some(EnvInner { tables }))
    }
}

/// Serialized form of one table inside a checkpoint
#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    name: String,
    dup: bool,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Apply one logged operation during recovery (no undo tracking)
fn apply_op(inner: &mut EnvInner, op: &LogOp) -> Result<()> {
    match op {
        LogOp::CreateTable { name, dup } => {
            if !inner.tables.iter().any(|t| t.name == *name) {
                inner.tables.push(Table {
                    name: name.clone(),
                    data: TableData::new(*dup),
                });
            }
        }
        LogOp::Upsert { table, key, value } => {
            plain_mut(inner, *table)?.insert(key.clone(), value.clone());
        }
        LogOp::Delete { table, key } => {
            plain_mut(inner, *table)?.remove(key);
        }
        LogOp::DupPut { table, key, value } => {
            dup_mut(inner, *table)?.insert((key.clone(), value.clone()));
        }
        LogOp::DupDelete { table, key, value } => {
            if !dup_mut(inner, *table)?.remove(&(key.clone(), value.clone())) {
                // A logged delete of a missing pair means the log and the
                // checkpoint disagree; tolerate it but leave a trace.
                warn!(table = *table, "logged dup delete had no matching pair");
            }
        }
    }
    Ok(())
}

fn plain_mut(inner: &mut EnvInner, id: u32) -> Result<&mut BTreeMap<Vec<u8>, Vec<u8>>> {
    match inner.tables.get_mut(id as usize).map(|t| &mut t.data) {
        Some(TableData::Plain(map)) => Ok(map),
        Some(TableData::Dup(_)) => Err(CacheError::Corruption(format!(
            "log record addresses table {id} as plain, but it allows duplicates"
        ))),
        None => Err(CacheError::Corruption(format!(
            "log record addresses unknown table {id}"
        ))),
    }
}

fn dup_mut(inner: &mut EnvInner, id: u32) -> Result<&mut BTreeSet<(Vec<u8>, Vec<u8>)>> {
    match inner.tables.get_mut(id as usize).map(|t| &mut t.data) {
        Some(TableData::Dup(set)) => Ok(set),
        Some(TableData::Plain(_)) => Err(CacheError::Corruption(format!(
            "log record addresses table {id} as dup, but it is plain"
        ))),
        None => Err(CacheError::Corruption(format!(
            "log record addresses unknown table {id}"
        ))),
    }
}
