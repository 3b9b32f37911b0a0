//! # Cache Behavior Tests
//!
//! Tests for:
//! - LRU eviction order and capacity bounds
//! - TTL expiry on access
//! - Shard partitioning and aggregation
//! - Statistics counters

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use shirokv_core::config::EngineConfig;
use shirokv_storage::KvEngine;

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn engine(shards: usize, capacity: usize) -> KvEngine {
    KvEngine::new(EngineConfig {
        shard_count: shards,
        capacity_per_shard: capacity,
        ..Default::default()
    })
    .unwrap()
}

/// Mirror of the store's shard dispatch, used to pick keys that land on a
/// chosen shard.
fn shard_of(key: &Bytes, shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count
}

fn keys_on_shard(shard: usize, shard_count: usize, n: usize) -> Vec<Bytes> {
    let mut found = Vec::new();
    for i in 0.. {
        let key = b(&format!("probe-{}", i));
        if shard_of(&key, shard_count) == shard {
            found.push(key);
            if found.len() == n {
                break;
            }
        }
    }
    found
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn lru_evicts_oldest_when_full() {
    // Single shard, capacity 3: the fourth insert pushes out the first.
    let engine = engine(1, 3);

    engine.put(b("a"), b("1"), 0).await.unwrap();
    engine.put(b("b"), b("2"), 0).await.unwrap();
    engine.put(b("c"), b("3"), 0).await.unwrap();
    engine.put(b("d"), b("4"), 0).await.unwrap();

    assert!(engine.get(&b("a")).is_none());
    assert_eq!(engine.get(&b("d")), Some(b("4")));
    assert_eq!(engine.size(), 3);
    assert_eq!(engine.stats().evictions, 1);
}

#[tokio::test]
async fn capacity_one_distinct_inserts() {
    let engine = engine(1, 1);
    for i in 0..10 {
        engine.put(b(&format!("k{}", i)), b("v"), 0).await.unwrap();
        assert_eq!(engine.size(), 1);
    }
    assert_eq!(engine.stats().evictions, 9);
    assert_eq!(engine.get(&b("k9")), Some(b("v")));
}

#[tokio::test]
async fn overwrite_does_not_evict() {
    let engine = engine(1, 2);
    engine.put(b("k"), b("v1"), 0).await.unwrap();
    engine.put(b("k"), b("v2"), 0).await.unwrap();
    engine.put(b("k"), b("v3"), 0).await.unwrap();

    assert_eq!(engine.size(), 1);
    assert_eq!(engine.get(&b("k")), Some(b("v3")));
    assert_eq!(engine.stats().evictions, 0);
}

// =============================================================================
// TTL
// =============================================================================

#[tokio::test]
async fn ttl_expires_on_access() {
    let engine = engine(1, 10);

    engine.put(b("x"), b("1"), 50).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    assert!(engine.get(&b("x")).is_none());
    let stats = engine.stats();
    assert_eq!(stats.expired, 1);

    // The entry is gone; further lookups are plain misses.
    assert!(engine.get(&b("x")).is_none());
    assert_eq!(engine.stats().expired, 1);
}

#[tokio::test]
async fn zero_ttl_never_expires() {
    let engine = engine(1, 10);
    engine.put(b("eternal"), b("v"), 0).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(engine.get(&b("eternal")), Some(b("v")));
    assert_eq!(engine.stats().expired, 0);
}

#[tokio::test]
async fn refresh_extends_deadline() {
    let engine = engine(1, 10);
    engine.put(b("k"), b("v"), 60).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(35)).await;

    // Re-put with a fresh TTL before the first deadline hits.
    engine.put(b("k"), b("v2"), 60).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(35)).await;

    assert_eq!(engine.get(&b("k")), Some(b("v2")));
}

// =============================================================================
// Sharding
// =============================================================================

#[tokio::test]
async fn shards_have_independent_capacity() {
    // Capacity 2 per shard, two shards, two keys per shard: everything fits.
    let engine = engine(2, 2);

    let shard0 = keys_on_shard(0, 2, 2);
    let shard1 = keys_on_shard(1, 2, 2);

    for key in shard0.iter().chain(shard1.iter()) {
        engine.put(key.clone(), b("v"), 0).await.unwrap();
    }

    assert_eq!(engine.size(), 4);
    assert_eq!(engine.stats().evictions, 0);
    for key in shard0.iter().chain(shard1.iter()) {
        assert_eq!(engine.get(key), Some(b("v")));
    }
}

#[tokio::test]
async fn same_key_always_same_shard() {
    let engine = engine(8, 100);
    for _ in 0..20 {
        engine.put(b("pinned"), b("v"), 0).await.unwrap();
    }
    // If the key ever moved shards, overwrites would accumulate as inserts.
    assert_eq!(engine.size(), 1);
}

// =============================================================================
// Boundary values
// =============================================================================

#[tokio::test]
async fn zero_length_key_and_value() {
    let engine = engine(4, 10);

    engine.put(Bytes::new(), Bytes::new(), 0).await.unwrap();
    assert_eq!(engine.get(&Bytes::new()), Some(Bytes::new()));

    engine.put(b("k"), Bytes::new(), 0).await.unwrap();
    assert_eq!(engine.get(&b("k")), Some(Bytes::new()));

    assert!(engine.remove(&Bytes::new()).await.unwrap());
    assert!(engine.get(&Bytes::new()).is_none());
}

#[tokio::test]
async fn get_after_put_returns_value() {
    let engine = engine(4, 1000);
    for i in 0..200 {
        let key = b(&format!("key-{}", i));
        let value = b(&format!("value-{}", i));
        engine.put(key.clone(), value.clone(), 0).await.unwrap();
        assert_eq!(engine.get(&key), Some(value));
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[tokio::test]
async fn stats_track_hits_misses_and_peak() {
    let engine = engine(1, 10);

    engine.put(b("a"), b("1"), 0).await.unwrap();
    engine.put(b("b"), b("2"), 0).await.unwrap();

    assert!(engine.get(&b("a")).is_some());
    assert!(engine.get(&b("a")).is_some());
    assert!(engine.get(&b("missing")).is_none());

    let stats = engine.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.puts, 2);
    assert_eq!(stats.current_size, 2);
    assert_eq!(stats.peak_size, 2);
    assert!(stats.hit_rate() > 0.6 && stats.hit_rate() < 0.7);
    assert!(stats.last_access_time_ms >= stats.start_time_ms);
}

#[tokio::test]
async fn reset_stats_keeps_data() {
    let engine = engine(1, 10);
    engine.put(b("k"), b("v"), 0).await.unwrap();
    assert!(engine.get(&b("k")).is_some());

    engine.reset_stats();
    let stats = engine.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.puts, 0);
    // Data survives a stats reset.
    assert_eq!(engine.get(&b("k")), Some(b("v")));
}

#[tokio::test]
async fn clear_empties_every_shard() {
    let engine = engine(4, 100);
    for i in 0..50 {
        engine.put(b(&format!("k{}", i)), b("v"), 0).await.unwrap();
    }
    assert_eq!(engine.size(), 50);

    engine.clear().await;
    assert_eq!(engine.size(), 0);
    assert!(engine.get(&b("k0")).is_none());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_disjoint_keys() {
    let engine = std::sync::Arc::new(engine(8, 10_000));
    let mut handles = Vec::new();

    for w in 0..8 {
        let engine = std::sync::Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for i in 0..250 {
                let key = b(&format!("writer{}-key{}", w, i));
                engine.put(key.clone(), b("v"), 0).await.unwrap();
                assert_eq!(engine.get(&key), Some(b("v")));
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(engine.size(), 2000);
    let stats = engine.stats();
    assert_eq!(stats.puts, 2000);
    assert!(stats.current_size <= stats.capacity);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_and_writers_same_keys() {
    let engine = std::sync::Arc::new(engine(4, 100));
    for i in 0..32 {
        engine.put(b(&format!("k{}", i)), b("v0"), 0).await.unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..4 {
        let engine = std::sync::Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for round in 0..100 {
                let key = b(&format!("k{}", (w * 7 + round) % 32));
                if round % 3 == 0 {
                    engine
                        .put(key.clone(), b(&format!("v{}", round)), 0)
                        .await
                        .unwrap();
                } else {
                    // A read either misses (removed elsewhere) or sees some
                    // previously written value; it must never panic or hang.
                    let _ = engine.get(&key);
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(engine.size() <= 32);
}
