//! TTL Store
//!
//! The core cache operations over the storage engine: one transaction per
//! operation, both tables updated in lockstep.
//!
//! ## Responsibilities
//! - Open the environment and declare the primary and index tables
//! - Wrap every operation in exactly one transaction (`with_txn`)
//! - Keep invariant: every live primary key has one forward and one
//!   reverse index entry agreeing on the same expiry
//! - Lazily remove expired entries on read; batch-remove them on `evict`
//!
//! Mutating operations use the non-blocking `Try` mode and surface
//! [`CacheError::WouldBlock`] under writer contention; enumeration uses a
//! true read-only transaction.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{Cursor, DupCursor, Environment, TableId, Transaction, TxnMode};
use crate::error::{CacheError, Result};

use super::index::{self, EXPIRY_WIDTH, KV_TABLE, TTL_TABLE};
use super::now_millis;

/// Storage handle plus the six cache operations
pub struct TtlStore {
    env: Environment,
    kv: TableId,
    ttl: TableId,
}

impl TtlStore {
    /// Open or create the store under `config.data_dir`.
    ///
    /// Declares both tables in a single setup transaction.
    pub fn open(config: &Config) -> Result<Self> {
        let env = Environment::open(&config.data_dir, 2, config.sync_on_commit)?;

        let (kv, ttl) = {
            let mut txn = env.begin(TxnMode::Write)?;
            let kv = txn.declare_table(KV_TABLE, true, false)?;
            let ttl = txn.declare_table(TTL_TABLE, true, true)?;
            txn.commit()?;
            (kv, ttl)
        };

        info!(data_dir = %config.data_dir.display(), "ttl store opened");
        Ok(Self { env, kv, ttl })
    }

    /// Run `work` inside one transaction: commit on `Ok`, abort on `Err`.
    ///
    /// This is the only place cache code manages transaction lifetime.
    fn with_txn<T>(
        &self,
        mode: TxnMode,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut txn = self.env.begin(mode)?;
        match work(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort();
                Err(e)
            }
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Store `key -> value`, expiring after `ttl`
    pub fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expiry = now_millis().saturating_add(ttl.as_millis() as u64);
        let (kv_id, ttl_id) = (self.kv, self.ttl);

        self.with_txn(TxnMode::Try, |txn| {
            txn.upsert(kv_id, key.as_bytes(), value)?;
            index::reindex(txn, ttl_id, key.as_bytes(), expiry)
        })?;

        debug!(key, expiry, "set");
        Ok(())
    }

    /// Read `key`'s value if it is still fresh.
    ///
    /// A stale entry is removed on the spot and reported as absent. When
    /// `refresh` is supplied, a fresh entry's lifetime is extended before
    /// the value is returned.
    pub fn get(&self, key: &str, refresh: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let (kv_id, ttl_id) = (self.kv, self.ttl);

        self.with_txn(TxnMode::Try, |txn| {
            let value = match txn.get(kv_id, key.as_bytes())? {
                Some(value) => value,
                None => return Ok(None),
            };

            let expiry = match index::forward_expiry(txn, ttl_id, key.as_bytes())? {
                Some(expiry) => expiry,
                None => {
                    return Err(CacheError::IndexCorruption {
                        table: TTL_TABLE.to_string(),
                        key: key.to_string(),
                    })
                }
            };

            let now = now_millis();
            if expiry <= now {
                // Lazy deletion: the entry is logically absent already
                index::remove_key(txn, kv_id, ttl_id, key.as_bytes(), true)?;
                debug!(key, "lazily removed expired entry on read");
                return Ok(None);
            }

            if let Some(refresh) = refresh {
                let new_expiry = now.saturating_add(refresh.as_millis() as u64);
                index::reindex(txn, ttl_id, key.as_bytes(), new_expiry)?;
                debug!(key, new_expiry, "touch-refreshed on read");
            }

            Ok(Some(value))
        })
    }

    /// Remove `key`. Deleting an absent key is a success, not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        let (kv_id, ttl_id) = (self.kv, self.ttl);

        let existed = self.with_txn(TxnMode::Try, |txn| {
            index::remove_key(txn, kv_id, ttl_id, key.as_bytes(), true)
        })?;

        debug!(key, existed, "delete");
        Ok(())
    }

    /// Move value and expiry from `old` to `new` atomically.
    ///
    /// Returns `Ok(false)` (no error) when `old` is absent, when `old` has
    /// already expired (which lazily removes it), or when `new` is taken.
    /// A live `old` key with no forward-index entry is index corruption and
    /// surfaces as a hard error.
    pub fn rename(&self, old: &str, new: &str) -> Result<bool> {
        let (kv_id, ttl_id) = (self.kv, self.ttl);

        let renamed = self.with_txn(TxnMode::Try, |txn| {
            let value = match txn.get(kv_id, old.as_bytes())? {
                Some(value) => value,
                None => return Ok(false),
            };

            let expiry = match index::forward_expiry(txn, ttl_id, old.as_bytes())? {
                Some(expiry) => expiry,
                None => {
                    return Err(CacheError::IndexCorruption {
                        table: TTL_TABLE.to_string(),
                        key: old.to_string(),
                    })
                }
            };

            if expiry <= now_millis() {
                // Dead data does not get renamed; reclaim it instead
                index::remove_key(txn, kv_id, ttl_id, old.as_bytes(), true)?;
                return Ok(false);
            }

            if let Err(e) = txn.insert_if_absent(kv_id, new.as_bytes(), &value) {
                return match e {
                    // Target taken: a normal could-not-rename outcome
                    CacheError::AlreadyExists => Ok(false),
                    e => Err(e),
                };
            }

            // New key inherits the old expiry unchanged
            index::reindex(txn, ttl_id, new.as_bytes(), expiry)?;
            index::remove_key(txn, kv_id, ttl_id, old.as_bytes(), true)?;
            Ok(true)
        })?;

        debug!(old, new, renamed, "rename");
        Ok(renamed)
    }

    /// Visit every currently-fresh key in key order.
    ///
    /// Read-only and non-mutating: stale entries are skipped, not removed.
    /// The visitor returns `Ok(true)` to continue, `Ok(false)` to stop;
    /// an `Err` aborts the transaction and propagates.
    pub fn keys<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        let (kv_id, ttl_id) = (self.kv, self.ttl);

        self.with_txn(TxnMode::ReadOnly, |txn| {
            let now = now_millis();
            let mut cursor = Cursor::new(kv_id);

            while let Some((key, _value)) = cursor.next(txn)? {
                let expiry = match index::forward_expiry(txn, ttl_id, &key)? {
                    Some(expiry) => expiry,
                    None => {
                        return Err(CacheError::IndexCorruption {
                            table: TTL_TABLE.to_string(),
                            key: String::from_utf8_lossy(&key).into_owned(),
                        })
                    }
                };

                if expiry <= now {
                    continue;
                }

                let key = std::str::from_utf8(&key).map_err(|_| {
                    CacheError::Corruption(format!(
                        "non-UTF-8 key in table '{KV_TABLE}': {key:?}"
                    ))
                })?;
                if !visit(key)? {
                    break;
                }
            }
            Ok(())
        })
    }

    /// Remove expired entries in ascending expiry order.
    ///
    /// Walks the reverse index and stops at the first fresh entry, at
    /// `limit` (when given), or when the visitor declines. A declining
    /// visitor commits the partial progress; a visitor error aborts the
    /// transaction, evicting nothing.
    ///
    /// Returns the number of entries evicted.
    pub fn evict<F>(&self, limit: Option<usize>, mut visit: F) -> Result<usize>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        let (kv_id, ttl_id) = (self.kv, self.ttl);

        let evicted = self.with_txn(TxnMode::Try, |txn| {
            let now = now_millis();
            let mut cursor = DupCursor::new(ttl_id);
            let mut evicted = 0usize;

            while let Some((raw, key)) = cursor.next(txn)? {
                if raw.len() != EXPIRY_WIDTH {
                    // Left the reverse region; only forward entries remain
                    break;
                }
                let expiry = match index::decode_expiry(&raw) {
                    Some(expiry) => expiry,
                    None => break,
                };
                if expiry > now {
                    // Index is expiry-sorted: everything beyond is fresh
                    break;
                }
                if limit.is_some_and(|cap| evicted >= cap) {
                    break;
                }

                let key_str = std::str::from_utf8(&key).map_err(|_| {
                    CacheError::Corruption(format!(
                        "non-UTF-8 key in table '{TTL_TABLE}': {key:?}"
                    ))
                })?;
                if !visit(key_str)? {
                    break;
                }

                txn.delete(kv_id, &key)?;
                txn.delete_dup(ttl_id, &key, &raw)?;
                txn.delete_dup(ttl_id, &raw, &key)?;
                evicted += 1;
            }

            Ok(evicted)
        })?;

        if evicted > 0 {
            debug!(evicted, "eviction pass removed expired entries");
        }
        Ok(evicted)
    }

    /// Checkpoint and close the underlying environment
    pub fn close(&self) -> Result<()> {
        self.env.close()
    }

    /// Whether the store has been closed
    pub fn is_closed(&self) -> bool {
        self.env.is_closed()
    }
}
