//! Expiry Index Maintenance
//!
//! The secondary index table holds two mappings at once:
//! - forward: `key -> expiry` (one entry per live key)
//! - reverse: `expiry -> key` (multi-map, sorted by expiry)
//!
//! Expiries are u64 Unix milliseconds encoded big-endian, so lexicographic
//! order equals numeric order and an ascending cursor walks entries in
//! expiry order. An encoded expiry always starts with a zero byte (a
//! millisecond timestamp stays below 2^56 for the next couple million
//! years) while validated cache keys are printable ASCII, so the two
//! mappings can never collide and all reverse entries sort before all
//! forward entries.
//!
//! Every helper here runs inside the caller's transaction; none of them
//! commit or abort.

use crate::engine::{TableId, Transaction};
use crate::error::{CacheError, Result};

/// Primary table: key -> value
pub(crate) const KV_TABLE: &str = "kv";

/// Index table: forward and reverse expiry mappings
pub(crate) const TTL_TABLE: &str = "ttl";

/// Width of an encoded expiry timestamp
pub(crate) const EXPIRY_WIDTH: usize = 8;

/// Encode an expiry for storage (big-endian, order-preserving)
pub(crate) fn encode_expiry(expiry: u64) -> [u8; EXPIRY_WIDTH] {
    expiry.to_be_bytes()
}

/// Decode a stored expiry; `None` if the raw bytes have the wrong width
pub(crate) fn decode_expiry(raw: &[u8]) -> Option<u64> {
    let arr: [u8; EXPIRY_WIDTH] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

/// Read the forward-index expiry for `key`, if any.
///
/// A forward entry with an invalid width is reported as index corruption.
pub(crate) fn forward_expiry(
    txn: &Transaction<'_>,
    ttl: TableId,
    key: &[u8],
) -> Result<Option<u64>> {
    match txn.get(ttl, key)? {
        None => Ok(None),
        Some(raw) => match decode_expiry(&raw) {
            Some(expiry) => Ok(Some(expiry)),
            None => Err(CacheError::IndexCorruption {
                table: TTL_TABLE.to_string(),
                key: String::from_utf8_lossy(key).into_owned(),
            }),
        },
    }
}

/// Point the index at a new expiry for `key`.
///
/// Removes the old reverse entry (tolerating its absence) and the old
/// forward entry, then writes both fresh entries. The old reverse entry is
/// always removed before the new one is inserted so the multi-map never
/// briefly holds two reverse entries for the key.
pub(crate) fn reindex(
    txn: &mut Transaction<'_>,
    ttl: TableId,
    key: &[u8],
    new_expiry: u64,
) -> Result<()> {
    if let Some(old) = forward_expiry(txn, ttl, key)? {
        let old_raw = encode_expiry(old);
        txn.delete_dup(ttl, &old_raw, key)?;
        txn.delete_dup(ttl, key, &old_raw)?;
    }

    let raw = encode_expiry(new_expiry);
    txn.put_dup(ttl, key, &raw)?;
    txn.put_dup(ttl, &raw, key)?;
    Ok(())
}

/// Remove `key` from the primary table (optionally) and from both index
/// mappings. Missing index entries are treated as already gone, which is
/// what makes this primitive idempotent.
///
/// Returns whether the key was present in the primary table.
pub(crate) fn remove_key(
    txn: &mut Transaction<'_>,
    kv: TableId,
    ttl: TableId,
    key: &[u8],
    delete_primary: bool,
) -> Result<bool> {
    let existed = if delete_primary {
        txn.delete(kv, key)?
    } else {
        false
    };

    if let Some(expiry) = forward_expiry(txn, ttl, key)? {
        let raw = encode_expiry(expiry);
        txn.delete_dup(ttl, key, &raw)?;
        txn.delete_dup(ttl, &raw, key)?;
    }

    Ok(existed)
}
