//! Vector-similarity mode over the ordinary KV storage.
//!
//! A float vector is stored under its key as the raw little-endian byte image
//! (4 bytes per component) through the normal put path, so vectors get TTL,
//! eviction, persistence, and recovery for free. Search is a map-reduce over
//! shards: each shard scans its live entries in parallel and keeps a bounded
//! max-heap of the k nearest, then the per-shard heaps merge into a global
//! one. Values whose length is not a multiple of 4 or whose dimension differs
//! from the query are simply skipped, so vectors and plain KV entries can
//! share a store.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;
use rayon::prelude::*;
use tracing::debug;

use crate::simd;
use crate::store::ShardedStore;

/// Raw little-endian byte image of a float vector.
pub fn encode_vector(vec: &[f32]) -> Bytes {
    let mut buf = Vec::with_capacity(vec.len() * 4);
    for component in vec {
        buf.extend_from_slice(&component.to_le_bytes());
    }
    Bytes::from(buf)
}

/// Decode a stored value back into floats. `None` means "not a vector":
/// the length is not a multiple of 4.
pub fn decode_vector(raw: &[u8]) -> Option<Vec<f32>> {
    if raw.len() % 4 != 0 {
        return None;
    }
    Some(
        raw.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Candidate ordered by distance (ties broken by key so results are
/// deterministic). `BinaryHeap` keeps the *worst* candidate on top, which is
/// exactly what a bounded Top-K wants to evict.
struct Scored {
    distance: f32,
    key: Bytes,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.key.cmp(&other.key))
    }
}

fn push_bounded(heap: &mut BinaryHeap<Scored>, candidate: Scored, k: usize) {
    heap.push(candidate);
    if heap.len() > k {
        heap.pop();
    }
}

/// Top-K nearest keys by squared Euclidean distance, ascending. Disabled
/// shards are skipped; the global consistency lock is never taken, so search
/// runs concurrently with mutations and sees each shard atomically but the
/// store only approximately.
pub fn search(store: &ShardedStore, query: &[f32], k: usize) -> Vec<Bytes> {
    if k == 0 || query.is_empty() {
        return Vec::new();
    }

    let per_shard: Vec<Vec<Scored>> = store
        .shards()
        .par_iter()
        .enumerate()
        .map(|(idx, shard)| {
            if store.is_disabled(idx) {
                debug!(shard = idx, "vector search skipping disabled shard");
                return Vec::new();
            }

            let mut heap = BinaryHeap::with_capacity(k + 1);
            for (key, value) in shard.snapshot_entries() {
                let Some(candidate) = decode_vector(&value) else {
                    continue;
                };
                if candidate.len() != query.len() {
                    continue;
                }
                let distance = simd::l2_distance_squared(query, &candidate);
                push_bounded(&mut heap, Scored { distance, key }, k);
            }
            heap.into_vec()
        })
        .collect();

    let mut global = BinaryHeap::with_capacity(k + 1);
    for scored in per_shard.into_iter().flatten() {
        push_bounded(&mut global, scored, k);
    }

    global
        .into_sorted_vec()
        .into_iter()
        .map(|scored| scored.key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let vec = vec![1.0f32, -2.5, 0.0, 3.25];
        let raw = encode_vector(&vec);
        assert_eq!(raw.len(), 16);
        assert_eq!(decode_vector(&raw).unwrap(), vec);
    }

    #[test]
    fn non_multiple_of_four_is_not_a_vector() {
        assert!(decode_vector(b"abcde").is_none());
        assert_eq!(decode_vector(b"").unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn bounded_heap_keeps_nearest() {
        let mut heap = BinaryHeap::new();
        for (d, name) in [(5.0, "e"), (1.0, "a"), (3.0, "c"), (2.0, "b"), (4.0, "d")] {
            push_bounded(
                &mut heap,
                Scored {
                    distance: d,
                    key: Bytes::copy_from_slice(name.as_bytes()),
                },
                3,
            );
        }
        let sorted = heap.into_sorted_vec();
        let keys: Vec<&[u8]> = sorted.iter().map(|s| s.key.as_ref()).collect();
        assert_eq!(keys, vec![b"a".as_ref(), b"b".as_ref(), b"c".as_ref()]);
    }
}
