//! Tests for the TTL cache
//!
//! These tests verify:
//! - Set/get round-trips and expiry behavior
//! - Touch-refresh extending an entry's lifetime
//! - Delete idempotence
//! - Rename atomicity (value and expiry move together, or nothing moves)
//! - Enumeration of fresh keys with early termination
//! - Expiry-ordered, bounded eviction
//! - Persistence across close/reopen and closed-cache behavior

use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use ttlkv::{Cache, CacheError, Config, Environment, TxnMode};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_cache() -> (TempDir, Cache) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .default_ttl(Duration::from_secs(60))
        .build();
    let cache = Cache::open(config).unwrap();
    (temp_dir, cache)
}

fn collect_keys(cache: &Cache) -> Vec<String> {
    let mut keys = Vec::new();
    cache
        .keys(|key| {
            keys.push(key.to_string());
            Ok(true)
        })
        .unwrap();
    keys
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_set_get_round_trip() {
    let (_temp, cache) = setup_temp_cache();

    cache.set("hello", b"world", None).unwrap();
    assert_eq!(cache.get("hello").unwrap(), Some(b"world".to_vec()));
}

#[test]
fn test_get_missing_key_is_not_an_error() {
    let (_temp, cache) = setup_temp_cache();

    assert_eq!(cache.get("nonexistent").unwrap(), None);
}

#[test]
fn test_set_overwrites_value_and_resets_ttl() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("key", b"v1", Some(Duration::from_millis(100)))
        .unwrap();
    cache.set("key", b"v2", Some(Duration::from_secs(60))).unwrap();

    thread::sleep(Duration::from_millis(200));
    // Still fresh: the second set replaced the short TTL
    assert_eq!(cache.get("key").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_binary_values_survive() {
    let (_temp, cache) = setup_temp_cache();

    let value = vec![0u8, 255, 1, 254, 0, 42];
    cache.set("bin", &value, None).unwrap();
    assert_eq!(cache.get("bin").unwrap(), Some(value));
}

#[test]
fn test_empty_value_is_stored() {
    let (_temp, cache) = setup_temp_cache();

    cache.set("empty", b"", None).unwrap();
    assert_eq!(cache.get("empty").unwrap(), Some(Vec::new()));
}

// =============================================================================
// Expiry Tests
// =============================================================================

#[test]
fn test_expired_entry_is_absent() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("short", b"v", Some(Duration::from_millis(80)))
        .unwrap();
    cache.set("long", b"v", Some(Duration::from_secs(60))).unwrap();

    thread::sleep(Duration::from_millis(160));

    assert_eq!(cache.get("short").unwrap(), None);
    // A longer-lived neighbor is untouched at the same instant
    assert_eq!(cache.get("long").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_lazy_removal_on_read_cleans_the_index() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("stale", b"v", Some(Duration::from_millis(50)))
        .unwrap();
    thread::sleep(Duration::from_millis(120));

    assert_eq!(cache.get("stale").unwrap(), None);
    // The read removed it: nothing left for eviction to find
    assert_eq!(cache.evict_expired(None).unwrap(), 0);
}

#[test]
fn test_touch_refresh_extends_lifetime() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("key", b"v", Some(Duration::from_millis(150)))
        .unwrap();

    // Refresh well past the original window
    assert_eq!(
        cache
            .get_touch("key", Some(Duration::from_millis(600)))
            .unwrap(),
        Some(b"v".to_vec())
    );

    thread::sleep(Duration::from_millis(300));
    // Original window has passed; the refresh keeps it alive
    assert_eq!(cache.get("key").unwrap(), Some(b"v".to_vec()));

    thread::sleep(Duration::from_millis(450));
    // The refreshed window has passed too
    assert_eq!(cache.get("key").unwrap(), None);
}

#[test]
fn test_plain_get_does_not_refresh() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("key", b"v", Some(Duration::from_millis(150)))
        .unwrap();
    assert_eq!(cache.get("key").unwrap(), Some(b"v".to_vec()));

    thread::sleep(Duration::from_millis(250));
    assert_eq!(cache.get("key").unwrap(), None);
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_removes_entry() {
    let (_temp, cache) = setup_temp_cache();

    cache.set("key", b"v", None).unwrap();
    cache.delete("key").unwrap();
    assert_eq!(cache.get("key").unwrap(), None);
}

#[test]
fn test_delete_absent_key_is_success() {
    let (_temp, cache) = setup_temp_cache();

    cache.delete("never_existed").unwrap();
}

#[test]
fn test_deleted_key_leaves_no_index_residue() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("key", b"v", Some(Duration::from_millis(50)))
        .unwrap();
    cache.delete("key").unwrap();

    thread::sleep(Duration::from_millis(120));
    // Expiry window passed, but the index entry went with the delete
    assert_eq!(cache.evict_expired(None).unwrap(), 0);
}

// =============================================================================
// Rename Tests
// =============================================================================

#[test]
fn test_rename_moves_value_and_expiry() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("a", b"payload", Some(Duration::from_millis(400)))
        .unwrap();
    assert!(cache.rename("a", "b").unwrap());

    assert_eq!(cache.get("a").unwrap(), None);
    assert_eq!(cache.get("b").unwrap(), Some(b"payload".to_vec()));

    // The old expiry travelled with the value
    thread::sleep(Duration::from_millis(550));
    assert_eq!(cache.get("b").unwrap(), None);
}

#[test]
fn test_rename_missing_source_returns_false() {
    let (_temp, cache) = setup_temp_cache();

    assert!(!cache.rename("ghost", "b").unwrap());
}

#[test]
fn test_rename_onto_existing_target_is_a_clean_no() {
    let (_temp, cache) = setup_temp_cache();

    cache.set("a", b"va", None).unwrap();
    cache.set("b", b"vb", None).unwrap();

    assert!(!cache.rename("a", "b").unwrap());
    // Both keys keep their original values
    assert_eq!(cache.get("a").unwrap(), Some(b"va".to_vec()));
    assert_eq!(cache.get("b").unwrap(), Some(b"vb".to_vec()));
}

#[test]
fn test_rename_expired_source_reclaims_it() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("a", b"v", Some(Duration::from_millis(50)))
        .unwrap();
    thread::sleep(Duration::from_millis(120));

    assert!(!cache.rename("a", "b").unwrap());
    assert_eq!(cache.get("b").unwrap(), None);
    // The expired source was removed as a side effect
    assert!(collect_keys(&cache).is_empty());
    assert_eq!(cache.evict_expired(None).unwrap(), 0);
}

// =============================================================================
// Enumeration Tests
// =============================================================================

#[test]
fn test_keys_visits_only_fresh_entries_in_order() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("stale1", b"v", Some(Duration::from_millis(50)))
        .unwrap();
    cache
        .set("stale2", b"v", Some(Duration::from_millis(50)))
        .unwrap();
    for key in ["cherry", "apple", "banana"] {
        cache.set(key, b"v", Some(Duration::from_secs(60))).unwrap();
    }

    thread::sleep(Duration::from_millis(120));

    assert_eq!(collect_keys(&cache), vec!["apple", "banana", "cherry"]);
}

#[test]
fn test_keys_early_return_stops_traversal() {
    let (_temp, cache) = setup_temp_cache();

    for key in ["a", "b", "c", "d", "e"] {
        cache.set(key, b"v", None).unwrap();
    }

    let mut seen = Vec::new();
    cache
        .keys(|key| {
            seen.push(key.to_string());
            Ok(seen.len() < 2)
        })
        .unwrap();
    assert_eq!(seen, vec!["a", "b"]);
}

#[test]
fn test_keys_visitor_error_propagates() {
    let (_temp, cache) = setup_temp_cache();

    cache.set("a", b"v", None).unwrap();
    let err = cache
        .keys(|_| Err(CacheError::Engine("visitor bailed".to_string())))
        .unwrap_err();
    assert!(matches!(err, CacheError::Engine(_)));
}

#[test]
fn test_keys_does_not_delete_stale_entries() {
    let (_temp, cache) = setup_temp_cache();

    cache
        .set("stale", b"v", Some(Duration::from_millis(50)))
        .unwrap();
    thread::sleep(Duration::from_millis(120));

    assert!(collect_keys(&cache).is_empty());
    // keys() skipped it without removing it; eviction still finds it
    assert_eq!(cache.evict_expired(None).unwrap(), 1);
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_evict_removes_in_expiry_order() {
    let (_temp, cache) = setup_temp_cache();

    cache.set("t1a", b"v", Some(Duration::from_millis(100))).unwrap();
    cache.set("t1b", b"v", Some(Duration::from_millis(100))).unwrap();
    cache.set("t3", b"v", Some(Duration::from_millis(300))).unwrap();
    cache.set("t5a", b"v", Some(Duration::from_millis(500))).unwrap();
    cache.set("t5b", b"v", Some(Duration::from_millis(500))).unwrap();

    thread::sleep(Duration::from_millis(200));
    let mut evicted = Vec::new();
    let count = cache
        .evict(None, |key| {
            evicted.push(key.to_string());
            Ok(true)
        })
        .unwrap();
    assert_eq!(count, 2);
    evicted.sort();
    assert_eq!(evicted, vec!["t1a", "t1b"]);
    // Fresh keys were never touched
    assert_eq!(cache.get("t3").unwrap(), Some(b"v".to_vec()));

    thread::sleep(Duration::from_millis(200));
    assert_eq!(cache.evict_expired(None).unwrap(), 1);

    thread::sleep(Duration::from_millis(200));
    assert_eq!(cache.evict_expired(None).unwrap(), 2);
    assert!(collect_keys(&cache).is_empty());
}

#[test]
fn test_evict_respects_limit_with_partial_count() {
    let (_temp, cache) = setup_temp_cache();

    for key in ["a", "b", "c"] {
        cache.set(key, b"v", Some(Duration::from_millis(50))).unwrap();
    }
    thread::sleep(Duration::from_millis(150));

    assert_eq!(cache.evict_expired(Some(2)).unwrap(), 2);
    assert_eq!(cache.evict_expired(None).unwrap(), 1);
}

#[test]
fn test_evict_visitor_decline_commits_partial_progress() {
    let (_temp, cache) = setup_temp_cache();

    for key in ["a", "b", "c"] {
        cache.set(key, b"v", Some(Duration::from_millis(50))).unwrap();
    }
    thread::sleep(Duration::from_millis(150));

    let mut allowed = 0;
    let count = cache
        .evict(None, |_| {
            if allowed == 1 {
                return Ok(false);
            }
            allowed += 1;
            Ok(true)
        })
        .unwrap();
    assert_eq!(count, 1);
    // The declined walk committed what it had; the rest remains
    assert_eq!(cache.evict_expired(None).unwrap(), 2);
}

#[test]
fn test_evict_visitor_error_aborts_everything() {
    let (_temp, cache) = setup_temp_cache();

    for key in ["a", "b", "c"] {
        cache.set(key, b"v", Some(Duration::from_millis(50))).unwrap();
    }
    thread::sleep(Duration::from_millis(150));

    let mut visited = 0;
    let err = cache
        .evict(None, |_| {
            visited += 1;
            if visited == 2 {
                return Err(CacheError::Engine("visitor failed".to_string()));
            }
            Ok(true)
        })
        .unwrap_err();
    assert!(matches!(err, CacheError::Engine(_)));
    // The abort rolled back the first removal too
    assert_eq!(cache.evict_expired(None).unwrap(), 3);
}

#[test]
fn test_evict_with_nothing_expired_is_a_noop() {
    let (_temp, cache) = setup_temp_cache();

    cache.set("fresh", b"v", Some(Duration::from_secs(60))).unwrap();
    assert_eq!(cache.evict_expired(None).unwrap(), 0);
    assert_eq!(cache.get("fresh").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Index Corruption Tests
// =============================================================================

#[test]
fn test_live_key_without_forward_index_entry_is_corruption() {
    let temp_dir = TempDir::new().unwrap();

    // Plant a primary entry with no index entry through the raw engine
    {
        let env = Environment::open(temp_dir.path(), 2, true).unwrap();
        let mut txn = env.begin(TxnMode::Write).unwrap();
        let kv = txn.declare_table("kv", true, false).unwrap();
        txn.declare_table("ttl", true, true).unwrap();
        txn.upsert(kv, b"orphan", b"v").unwrap();
        txn.commit().unwrap();
        env.close().unwrap();
    }

    let cache = Cache::open_path(temp_dir.path()).unwrap();

    // Every read path that consults the expiry of a live key reports it
    assert!(matches!(
        cache.get("orphan").unwrap_err(),
        CacheError::IndexCorruption { .. }
    ));
    assert!(matches!(
        cache.rename("orphan", "other").unwrap_err(),
        CacheError::IndexCorruption { .. }
    ));
    assert!(matches!(
        cache.keys(|_| Ok(true)).unwrap_err(),
        CacheError::IndexCorruption { .. }
    ));

    // The failed operations aborted; the orphan entry is still in place
    assert!(matches!(
        cache.get("orphan").unwrap_err(),
        CacheError::IndexCorruption { .. }
    ));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_entries_survive_close_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    {
        let cache = Cache::open(config.clone()).unwrap();
        cache
            .set("durable", b"payload", Some(Duration::from_secs(60)))
            .unwrap();
        cache.close().unwrap();
    }

    {
        let cache = Cache::open(config).unwrap();
        assert_eq!(cache.get("durable").unwrap(), Some(b"payload".to_vec()));
    }
}

#[test]
fn test_entries_survive_crash_without_close() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    {
        let cache = Cache::open(config.clone()).unwrap();
        cache
            .set("durable", b"payload", Some(Duration::from_secs(60)))
            .unwrap();
        // Dropped without close: the commit log carries the data
    }

    {
        let cache = Cache::open(config).unwrap();
        assert_eq!(cache.get("durable").unwrap(), Some(b"payload".to_vec()));
    }
}

#[test]
fn test_expiry_is_absolute_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    {
        let cache = Cache::open(config.clone()).unwrap();
        cache
            .set("short", b"v", Some(Duration::from_millis(100)))
            .unwrap();
        cache.close().unwrap();
    }

    thread::sleep(Duration::from_millis(200));

    {
        // Reopening does not resurrect entries whose wall-clock expiry passed
        let cache = Cache::open(config).unwrap();
        assert_eq!(cache.get("short").unwrap(), None);
    }
}

// =============================================================================
// Close/Lifecycle Tests
// =============================================================================

#[test]
fn test_operations_after_close_fail_cleanly() {
    let (_temp, cache) = setup_temp_cache();

    cache.set("key", b"v", None).unwrap();
    cache.close().unwrap();

    assert!(matches!(
        cache.get("key").unwrap_err(),
        CacheError::Closed
    ));
    assert!(matches!(
        cache.set("key", b"v", None).unwrap_err(),
        CacheError::Closed
    ));
}

#[test]
fn test_close_is_idempotent() {
    let (_temp, cache) = setup_temp_cache();

    cache.close().unwrap();
    cache.close().unwrap();
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_concurrent_writers_with_retry() {
    use std::sync::Arc;

    let (_temp, cache) = setup_temp_cache();
    let cache = Arc::new(cache);

    let mut handles = vec![];
    for t in 0..4 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                let key = format!("thread{t}_key{i}");
                // Try-mode transactions fail fast under contention;
                // the caller owns the retry loop.
                loop {
                    match cache.set(&key, b"v", None) {
                        Ok(()) => break,
                        Err(e) if e.is_retryable() => thread::yield_now(),
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..25 {
            let key = format!("thread{t}_key{i}");
            assert_eq!(cache.get(&key).unwrap(), Some(b"v".to_vec()));
        }
    }
}
