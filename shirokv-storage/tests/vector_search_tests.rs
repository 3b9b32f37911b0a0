//! # Vector Search Tests
//!
//! Tests for:
//! - Top-K ordering by squared Euclidean distance
//! - Dimension-mismatch and non-vector values being skipped
//! - Vectors sharing TTL, persistence, and eviction with plain entries

use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use shirokv_core::config::EngineConfig;
use shirokv_storage::KvEngine;

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn engine() -> KvEngine {
    KvEngine::new(EngineConfig {
        shard_count: 4,
        capacity_per_shard: 1000,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn nearest_neighbors_in_ascending_distance_order() {
    let engine = engine();

    engine.vector_put(b("u"), &[1.0, 2.0, 3.0], 0).await.unwrap();
    engine.vector_put(b("v"), &[1.1, 2.0, 3.0], 0).await.unwrap();
    engine
        .vector_put(b("w"), &[10.0, 10.0, 10.0], 0)
        .await
        .unwrap();

    let results = engine.vector_search(&[1.0, 2.0, 3.0], 2);
    assert_eq!(results, vec![b("u"), b("v")]);
}

#[tokio::test]
async fn k_larger_than_population_returns_everything() {
    let engine = engine();
    engine.vector_put(b("a"), &[0.0, 0.0], 0).await.unwrap();
    engine.vector_put(b("b"), &[1.0, 0.0], 0).await.unwrap();

    let results = engine.vector_search(&[0.0, 0.0], 10);
    assert_eq!(results, vec![b("a"), b("b")]);
}

#[tokio::test]
async fn zero_k_and_empty_query_return_empty() {
    let engine = engine();
    engine.vector_put(b("a"), &[1.0], 0).await.unwrap();

    assert!(engine.vector_search(&[1.0], 0).is_empty());
    assert!(engine.vector_search(&[], 3).is_empty());
}

#[tokio::test]
async fn dimension_mismatch_is_skipped() {
    let engine = engine();
    engine.vector_put(b("2d"), &[1.0, 1.0], 0).await.unwrap();
    engine.vector_put(b("3d"), &[1.0, 1.0, 1.0], 0).await.unwrap();

    let results = engine.vector_search(&[1.0, 1.0], 10);
    assert_eq!(results, vec![b("2d")]);
}

#[tokio::test]
async fn plain_kv_values_do_not_poison_search() {
    let engine = engine();
    engine.vector_put(b("vec"), &[1.0, 2.0], 0).await.unwrap();
    // 5 bytes: not a float image, ignored by the scan.
    engine.put(b("text"), b("hello"), 0).await.unwrap();
    // 8 bytes: decodes as a 2-float vector and competes like any other.
    engine.put(b("octet"), b("12345678"), 0).await.unwrap();

    let results = engine.vector_search(&[1.0, 2.0], 10);
    assert_eq!(results[0], b("vec"));
    assert!(results.iter().all(|k| k != &b("text")));
}

#[tokio::test]
async fn vector_get_round_trip_and_malformed() {
    let engine = engine();
    let original = vec![0.5f32, -1.25, 3.75, 1e-3];
    engine.vector_put(b("v"), &original, 0).await.unwrap();
    assert_eq!(engine.vector_get(&b("v")), original);

    assert!(engine.vector_get(&b("absent")).is_empty());

    engine.put(b("bad"), b("xyz"), 0).await.unwrap();
    assert!(engine.vector_get(&b("bad")).is_empty());
}

#[tokio::test]
async fn expired_vectors_leave_search_results() {
    let engine = engine();
    engine.vector_put(b("stay"), &[0.0, 0.0], 0).await.unwrap();
    engine.vector_put(b("fade"), &[0.1, 0.0], 40).await.unwrap();

    let before = engine.vector_search(&[0.0, 0.0], 10);
    assert_eq!(before.len(), 2);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let after = engine.vector_search(&[0.0, 0.0], 10);
    assert_eq!(after, vec![b("stay")]);
}

#[tokio::test]
async fn vectors_survive_recovery() {
    let dir = TempDir::new().unwrap();

    {
        let engine = engine();
        engine
            .enable_persistence(dir.path(), Duration::from_millis(50))
            .unwrap();
        engine.vector_put(b("p"), &[1.0, 0.0], 0).await.unwrap();
        engine.vector_put(b("q"), &[0.0, 1.0], 0).await.unwrap();
        engine.disable_persistence().await;
    }

    let engine = engine();
    engine
        .enable_persistence(dir.path(), Duration::from_millis(50))
        .unwrap();
    assert!(engine.recover_from_disk());

    assert_eq!(engine.vector_get(&b("p")), vec![1.0, 0.0]);
    assert_eq!(engine.vector_search(&[1.0, 0.0], 1), vec![b("p")]);
}

#[tokio::test]
async fn search_over_many_vectors_finds_true_nearest() {
    let engine = engine();

    // A grid of 2-d points; the query sits on top of (7, 7).
    for x in 0..16 {
        for y in 0..16 {
            engine
                .vector_put(b(&format!("p-{}-{}", x, y)), &[x as f32, y as f32], 0)
                .await
                .unwrap();
        }
    }

    let results = engine.vector_search(&[7.0, 7.0], 5);
    assert_eq!(results.len(), 5);
    assert_eq!(results[0], b("p-7-7"));
    // The remaining four are the orthogonal neighbors at distance 1.
    for key in &results[1..] {
        let name = std::str::from_utf8(key).unwrap();
        assert!(
            ["p-6-7", "p-8-7", "p-7-6", "p-7-8"].contains(&name),
            "unexpected neighbor {}",
            name
        );
    }
}
