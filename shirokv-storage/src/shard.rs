//! Single-owner LRU shard with TTL.
//!
//! A hashmap indexes into an arena of nodes threaded as an intrusive doubly
//! linked list (head = most recently promoted). Integer indices with a NIL
//! sentinel stand in for pointers, so unlink/splice are O(1) without unsafe.
//! One mutex guards both structures; statistics counters are atomics so
//! `stats()` stays cheap.
//!
//! Recency is lazy: a hit splices its node to the front at most once per
//! 1-second window per shard. Hot keys stay away from the tail, but reads do
//! not turn the list into a serialization point. Callers must not assume
//! strict LRU order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use rand::seq::SliceRandom;

use shirokv_core::stats::CacheStats;
use shirokv_core::utils::now_ms;

const NIL: usize = usize::MAX;

/// Minimum gap between recency promotions within one shard.
const PROMOTE_WINDOW_MS: u64 = 1000;

struct Node {
    key: Bytes,
    value: Bytes,
    /// Absolute epoch-ms deadline; 0 means never expires.
    expiry_ms: u64,
    prev: usize,
    next: usize,
}

impl Node {
    fn is_expired(&self, now: u64) -> bool {
        self.expiry_ms != 0 && now > self.expiry_ms
    }
}

struct ShardInner {
    map: HashMap<Bytes, usize>,
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl ShardInner {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn alloc(&mut self, key: Bytes, value: Bytes, expiry_ms: u64) -> usize {
        let node = Node {
            key,
            value,
            expiry_ms,
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Unlink `idx`, drop its map entry, and return its slot to the free
    /// list. Values are replaced with empty handles so freed slots do not
    /// pin payload memory.
    fn release(&mut self, idx: usize) {
        self.unlink(idx);
        self.map.remove(&self.nodes[idx].key);
        self.nodes[idx].key = Bytes::new();
        self.nodes[idx].value = Bytes::new();
        self.free.push(idx);
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
    puts: AtomicU64,
    removes: AtomicU64,
    peak_size: AtomicUsize,
    start_time_ms: AtomicU64,
    last_access_time_ms: AtomicU64,
    last_hit_time_ms: AtomicU64,
    last_miss_time_ms: AtomicU64,
}

pub struct LruShard {
    capacity: usize,
    inner: Mutex<ShardInner>,
    counters: Counters,
    last_promote_ms: AtomicU64,
}

impl LruShard {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "shard capacity must be at least 1");
        let counters = Counters::default();
        counters.start_time_ms.store(now_ms(), Ordering::Relaxed);
        Self {
            capacity,
            inner: Mutex::new(ShardInner::with_capacity(capacity)),
            counters,
            last_promote_ms: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        let now = now_ms();
        self.counters.last_access_time_ms.store(now, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        let idx = match inner.map.get(key) {
            Some(&idx) => idx,
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.counters.last_miss_time_ms.store(now, Ordering::Relaxed);
                return None;
            }
        };

        if inner.nodes[idx].is_expired(now) {
            inner.release(idx);
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            self.counters.last_miss_time_ms.store(now, Ordering::Relaxed);
            return None;
        }

        // Lazy promotion: guard against clock steps before subtracting.
        let last = self.last_promote_ms.load(Ordering::Relaxed);
        if now >= last && now - last > PROMOTE_WINDOW_MS {
            inner.move_to_front(idx);
            self.last_promote_ms.store(now, Ordering::Relaxed);
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.counters.last_hit_time_ms.store(now, Ordering::Relaxed);
        Some(inner.nodes[idx].value.clone())
    }

    pub fn put(&self, key: Bytes, value: Bytes, ttl_ms: u64) {
        let now = now_ms();
        let expiry_ms = if ttl_ms > 0 { now + ttl_ms } else { 0 };

        let mut inner = self.inner.lock();

        if let Some(idx) = inner.map.get(&key).copied() {
            inner.nodes[idx].value = value;
            inner.nodes[idx].expiry_ms = expiry_ms;
            inner.move_to_front(idx);
        } else {
            if inner.map.len() >= self.capacity {
                let victim = inner.tail;
                debug_assert_ne!(victim, NIL);
                inner.release(victim);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
            let idx = inner.alloc(key.clone(), value, expiry_ms);
            inner.push_front(idx);
            inner.map.insert(key, idx);
        }

        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        self.update_peak(inner.map.len());
    }

    pub fn remove(&self, key: &Bytes) -> bool {
        let mut inner = self.inner.lock();
        match inner.map.get(key).copied() {
            Some(idx) => {
                inner.release(idx);
                self.counters.removes.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.nodes.clear();
        inner.free.clear();
        inner.head = NIL;
        inner.tail = NIL;
    }

    /// All live (non-expired) entries, most-recent first. Used by checkpoint
    /// export and vector search.
    pub fn snapshot_entries(&self) -> Vec<(Bytes, Bytes)> {
        let now = now_ms();
        let inner = self.inner.lock();
        let mut entries = Vec::with_capacity(inner.map.len());
        let mut idx = inner.head;
        while idx != NIL {
            let node = &inner.nodes[idx];
            if !node.is_expired(now) {
                entries.push((node.key.clone(), node.value.clone()));
            }
            idx = node.next;
        }
        entries
    }

    /// Non-blocking lock attempt for the expiration reaper.
    pub fn try_access(&self) -> Option<ShardAccess<'_>> {
        self.inner.try_lock().map(|inner| ShardAccess {
            inner,
            counters: &self.counters,
        })
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.inner.lock().map.len();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            removes: self.counters.removes.load(Ordering::Relaxed),
            current_size: size,
            capacity: self.capacity,
            peak_size: self.counters.peak_size.load(Ordering::Relaxed),
            start_time_ms: self.counters.start_time_ms.load(Ordering::Relaxed),
            last_access_time_ms: self.counters.last_access_time_ms.load(Ordering::Relaxed),
            last_hit_time_ms: self.counters.last_hit_time_ms.load(Ordering::Relaxed),
            last_miss_time_ms: self.counters.last_miss_time_ms.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.expired.store(0, Ordering::Relaxed);
        self.counters.evictions.store(0, Ordering::Relaxed);
        self.counters.puts.store(0, Ordering::Relaxed);
        self.counters.removes.store(0, Ordering::Relaxed);
        self.counters.peak_size.store(0, Ordering::Relaxed);
        self.counters.start_time_ms.store(now_ms(), Ordering::Relaxed);
        self.counters.last_access_time_ms.store(0, Ordering::Relaxed);
        self.counters.last_hit_time_ms.store(0, Ordering::Relaxed);
        self.counters.last_miss_time_ms.store(0, Ordering::Relaxed);
    }

    fn update_peak(&self, current: usize) {
        self.counters.peak_size.fetch_max(current, Ordering::Relaxed);
    }
}

/// Exclusive access to a shard obtained via `try_access`. The reaper samples
/// and expires under a single lock hold so the sampled keys cannot move
/// underneath it.
pub struct ShardAccess<'a> {
    inner: MutexGuard<'a, ShardInner>,
    counters: &'a Counters,
}

impl ShardAccess<'_> {
    /// Up to `n` uniformly random keys currently present in the shard.
    pub fn sample(&mut self, n: usize) -> Vec<Bytes> {
        let mut keys: Vec<Bytes> = self.inner.map.keys().cloned().collect();
        if keys.is_empty() {
            return keys;
        }
        keys.shuffle(&mut rand::thread_rng());
        keys.truncate(n);
        keys
    }

    /// Remove every listed key whose deadline has passed; returns the count.
    pub fn expire_keys(&mut self, keys: &[Bytes]) -> usize {
        let now = now_ms();
        let mut expired = 0;
        for key in keys {
            if let Some(idx) = self.inner.map.get(key).copied() {
                if self.inner.nodes[idx].is_expired(now) {
                    self.inner.release(idx);
                    self.counters.expired.fetch_add(1, Ordering::Relaxed);
                    expired += 1;
                }
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }
}
