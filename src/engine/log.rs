//! Commit Log
//!
//! Append-only redo log giving committed transactions durability.
//!
//! Every committed write transaction appends exactly one record holding all
//! of its operations, so the tables it touched persist or vanish together.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! Data is the bincode encoding of `Vec<LogOp>`; the CRC32 covers Data only.
//! Replay stops at the first record whose checksum or framing is invalid,
//! which is how partial writes from a crash are discarded.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Size of the per-record header: LSN (8) + CRC (4) + length (4)
pub const HEADER_SIZE: usize = 16;

/// A single logged table operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogOp {
    /// A table was created inside the transaction
    CreateTable { name: String, dup: bool },

    /// Insert or replace in a plain table
    Upsert { table: u32, key: Vec<u8>, value: Vec<u8> },

    /// Remove from a plain table
    Delete { table: u32, key: Vec<u8> },

    /// Insert a (key, value) pair into a duplicate-allowing table
    DupPut { table: u32, key: Vec<u8>, value: Vec<u8> },

    /// Remove a specific (key, value) pair from a duplicate-allowing table
    DupDelete { table: u32, key: Vec<u8>, value: Vec<u8> },
}

/// Outcome of replaying a commit log
#[derive(Debug, Default)]
pub struct RecoveryStats {
    /// Number of records successfully applied
    pub records_applied: u64,

    /// Number of trailing records discarded as corrupt/truncated
    pub records_corrupted: u64,

    /// Last valid LSN seen (0 if the log was empty)
    pub last_lsn: u64,
}

/// Appends commit records to the log file
pub struct CommitLog {
    file: File,
    next_lsn: u64,
    sync_on_commit: bool,
}

impl CommitLog {
    /// Open or create the log file for appending
    pub fn open(path: &Path, sync_on_commit: bool, next_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            next_lsn,
            sync_on_commit,
        })
    }

    /// Append one commit record; returns its LSN
    pub fn append(&mut self, ops: &[LogOp]) -> Result<u64> {
        let payload = bincode::serialize(ops)?;
        let crc = crc32fast::hash(&payload);
        let lsn = self.next_lsn;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&lsn.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);

        self.file.write_all(&buf)?;
        if self.sync_on_commit {
            self.file.sync_data()?;
        }

        self.next_lsn += 1;
        Ok(lsn)
    }

    /// Discard all records (after they became durable in a checkpoint).
    ///
    /// LSNs keep increasing across truncations.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Replay all valid records from a log file.
///
/// Missing file is treated as an empty log. Records after the first framing
/// or checksum failure are discarded and counted in the stats.
pub fn replay(path: &Path) -> Result<(Vec<Vec<LogOp>>, RecoveryStats)> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Vec::new(), RecoveryStats::default()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    let mut stats = RecoveryStats::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        if bytes.len() - offset < HEADER_SIZE {
            // Partial header at the tail
            stats.records_corrupted += 1;
            break;
        }

        let lsn = u64::from_le_bytes(to_array_8(&bytes[offset..offset + 8]));
        let crc = u32::from_le_bytes(to_array_4(&bytes[offset + 8..offset + 12]));
        let len = u32::from_le_bytes(to_array_4(&bytes[offset + 12..offset + 16])) as usize;
        let body_start = offset + HEADER_SIZE;

        if bytes.len() - body_start < len {
            // Partial payload at the tail
            stats.records_corrupted += 1;
            break;
        }

        let payload = &bytes[body_start..body_start + len];
        if crc32fast::hash(payload) != crc {
            stats.records_corrupted += 1;
            break;
        }

        let ops: Vec<LogOp> = match bincode::deserialize(payload) {
            Ok(ops) => ops,
            Err(_) => {
                stats.records_corrupted += 1;
                break;
            }
        };

        records.push(ops);
        stats.records_applied += 1;
        stats.last_lsn = lsn;
        offset = body_start + len;
    }

    Ok((records, stats))
}

fn to_array_8(slice: &[u8]) -> [u8; 8] {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(slice);
    arr
}

fn to_array_4(slice: &[u8]) -> [u8; 4] {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(slice);
    arr
}

/// Verify integrity of a log file without applying it
pub fn verify(path: &Path) -> Result<RecoveryStats> {
    let (_, stats) = replay(path)?;
    if stats.records_corrupted > 0 {
        return Err(CacheError::Corruption(format!(
            "commit log {} holds {} corrupt record(s) after {} valid one(s)",
            path.display(),
            stats.records_corrupted,
            stats.records_applied
        )));
    }
    Ok(stats)
}
