//! Eviction behavior: policy ordering under pressure, the entry-count
//! ceiling, and manual percentage eviction.

use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use tempfile::TempDir;

use cortex_kv_cache::cache::{CacheManager, PutOptions};
use cortex_kv_cache::config::{CacheConfig, CachePolicy};

fn manager_in(tmp: &Path) -> CacheManager {
    CacheManager::with_paths(
        &tmp.join("kv_cache.db"),
        &tmp.join("persist"),
        &tmp.join("shm"),
    )
    .expect("manager init")
}

// Timestamps come from the wall clock at f64 precision; keep puts and
// gets far enough apart to order distinctly.
fn tick() {
    sleep(Duration::from_millis(10));
}

#[test]
fn test_full_pool_evicts_lru_victim() {
    let tmp = TempDir::new().unwrap();
    let mgr = manager_in(tmp.path());

    // Three one-block entries fill the pool.
    let config = CacheConfig::new("lru", 3 * 4096);
    assert!(mgr.create_pool(&config));

    for id in 1..=3u64 {
        assert!(mgr.put("lru", id, &[id as u8; 4096], 1, PutOptions::default()));
        tick();
    }

    // Touch 1 so 2 and 3 become the least recently used pair. A full
    // one-block put evicts two candidates (payload blocks plus one).
    assert!(mgr.get("lru", 1).is_some());
    tick();

    assert!(mgr.put("lru", 4, &[4u8; 4096], 1, PutOptions::default()));

    assert_eq!(mgr.get("lru", 2), None);
    assert_eq!(mgr.get("lru", 3), None);
    assert!(mgr.get("lru", 1).is_some());
    assert_eq!(mgr.get("lru", 4).as_deref(), Some(&[4u8; 4096][..]));
}

#[test]
fn test_lfu_evicts_coldest_entry() {
    let tmp = TempDir::new().unwrap();
    let mgr = manager_in(tmp.path());

    let mut config = CacheConfig::new("lfu", 3 * 4096);
    config.policy = CachePolicy::Lfu;
    assert!(mgr.create_pool(&config));

    for id in 1..=3u64 {
        assert!(mgr.put("lfu", id, &[id as u8; 4096], 1, PutOptions::default()));
    }
    // 1 and 3 get extra accesses; 2 stays at its insert count.
    assert!(mgr.get("lfu", 1).is_some());
    assert!(mgr.get("lfu", 1).is_some());
    assert!(mgr.get("lfu", 3).is_some());

    // Two candidates go: 2 (coldest), then 3.
    assert!(mgr.put("lfu", 4, &[4u8; 4096], 1, PutOptions::default()));

    assert_eq!(mgr.get("lfu", 2), None);
    assert_eq!(mgr.get("lfu", 3), None);
    assert!(mgr.get("lfu", 1).is_some());
}

#[test]
fn test_fifo_evicts_oldest_regardless_of_access() {
    let tmp = TempDir::new().unwrap();
    let mgr = manager_in(tmp.path());

    let mut config = CacheConfig::new("fifo", 3 * 4096);
    config.policy = CachePolicy::Fifo;
    assert!(mgr.create_pool(&config));

    for id in 1..=3u64 {
        assert!(mgr.put("fifo", id, &[id as u8; 4096], 1, PutOptions::default()));
        tick();
    }
    // Heavy access does not protect the oldest entry under FIFO.
    for _ in 0..5 {
        assert!(mgr.get("fifo", 1).is_some());
    }

    // The two oldest inserts go, in creation order.
    assert!(mgr.put("fifo", 4, &[4u8; 4096], 1, PutOptions::default()));

    assert_eq!(mgr.get("fifo", 1), None);
    assert_eq!(mgr.get("fifo", 2), None);
    assert!(mgr.get("fifo", 3).is_some());
}

#[test]
fn test_priority_evicts_lowest_weight_first() {
    let tmp = TempDir::new().unwrap();
    let mgr = manager_in(tmp.path());

    let mut config = CacheConfig::new("prio", 3 * 4096);
    config.policy = CachePolicy::Priority;
    assert!(mgr.create_pool(&config));

    let with_priority = |priority| PutOptions {
        priority,
        ..Default::default()
    };
    assert!(mgr.put("prio", 1, &[1u8; 4096], 1, with_priority(10)));
    assert!(mgr.put("prio", 2, &[2u8; 4096], 1, with_priority(-5)));
    assert!(mgr.put("prio", 3, &[3u8; 4096], 1, with_priority(0)));

    // Lowest weights go first: 2 (-5) then 3 (0); 1 (10) survives.
    assert!(mgr.put("prio", 4, &[4u8; 4096], 1, with_priority(0)));

    assert_eq!(mgr.get("prio", 2), None);
    assert_eq!(mgr.get("prio", 3), None);
    assert!(mgr.get("prio", 1).is_some());
}

#[test]
fn test_max_sequences_ceiling() {
    let tmp = TempDir::new().unwrap();
    let mgr = manager_in(tmp.path());

    // Plenty of space, but only three entries allowed.
    let mut config = CacheConfig::new("ceiling", 32 * 4096);
    config.max_sequences = 3;
    assert!(mgr.create_pool(&config));

    for id in 1..=5u64 {
        assert!(mgr.put("ceiling", id, &[id as u8; 16], 1, PutOptions::default()));
        tick();
    }

    let entries = mgr.list_entries("ceiling").unwrap();
    assert_eq!(entries.len(), 3);

    // LRU order: the two oldest inserts were displaced.
    assert_eq!(mgr.get("ceiling", 1), None);
    assert_eq!(mgr.get("ceiling", 2), None);
    assert!(mgr.get("ceiling", 5).is_some());

    let rows = mgr.status(Some("ceiling")).unwrap();
    assert!(rows[0].eviction_count >= 2);
}

#[test]
fn test_oversized_payload_is_rejected_without_panic() {
    let tmp = TempDir::new().unwrap();
    let mgr = manager_in(tmp.path());

    assert!(mgr.create_pool(&CacheConfig::new("small", 2 * 4096)));
    assert!(mgr.put("small", 1, &[1u8; 4096], 1, PutOptions::default()));

    // Larger than the whole pool: eviction runs but cannot help, and the
    // put reports failure instead of panicking.
    assert!(!mgr.put("small", 2, &[2u8; 4 * 4096], 1, PutOptions::default()));
    assert_eq!(mgr.get("small", 2), None);
}

#[test]
fn test_manual_evict_percent_rounds_up() {
    let tmp = TempDir::new().unwrap();
    let mgr = manager_in(tmp.path());

    assert!(mgr.create_pool(&CacheConfig::new("manual", 16 * 4096)));
    for id in 1..=10u64 {
        assert!(mgr.put("manual", id, &[id as u8; 128], 1, PutOptions::default()));
        tick();
    }

    // 25% of 10 entries rounds up to 3.
    assert_eq!(mgr.evict("manual", 25.0), 3);
    assert_eq!(mgr.list_entries("manual").unwrap().len(), 7);

    // Oldest-idle entries went first under the default LRU policy.
    assert_eq!(mgr.get("manual", 1), None);
    assert_eq!(mgr.get("manual", 2), None);
    assert_eq!(mgr.get("manual", 3), None);
    assert!(mgr.get("manual", 4).is_some());
}

#[test]
fn test_evict_on_empty_pool_is_zero() {
    let tmp = TempDir::new().unwrap();
    let mgr = manager_in(tmp.path());

    assert!(mgr.create_pool(&CacheConfig::new("empty", 4 * 4096)));
    assert_eq!(mgr.evict("empty", 50.0), 0);
    assert_eq!(mgr.evict("no-such-pool", 50.0), 0);
}
