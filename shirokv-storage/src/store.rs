//! Sharded store: partitions keys across LRU shards and couples mutations to
//! the write-ahead log.
//!
//! Lock order (outermost first): consistency lock → WAL → shard → health.
//! The consistency lock is held shared by mutators and exclusively by the
//! checkpoint exporter; it exists solely so `export_all_data` sees a
//! point-in-time view. Reads never touch it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::RwLockWriteGuard;
use tracing::{debug, info, warn};

use shirokv_core::config::{EngineConfig, HealthConfig};
use shirokv_core::error::Result;
use shirokv_core::stats::CacheStats;
use shirokv_core::utils::now_ms;

use crate::shard::LruShard;
use crate::wal::{WalRecord, WriteAheadLog};

/// Point-in-time view of shard health.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub overall_healthy: bool,
    pub healthy_shards: usize,
    pub total_shards: usize,
    pub disabled_shards: Vec<usize>,
    pub error_counts: HashMap<usize, u32>,
    pub error_rate: f64,
    pub last_health_check_ms: u64,
}

struct HealthTracker {
    error_counts: HashMap<usize, u32>,
    disabled: HashSet<usize>,
    last_check_ms: u64,
}

pub struct ShardedStore {
    shards: Vec<Arc<LruShard>>,
    /// Shared by `put`/`remove`, exclusive during checkpoint export + WAL
    /// truncation. `get` never acquires it.
    consistency: tokio::sync::RwLock<()>,
    wal: RwLock<Option<Arc<WriteAheadLog>>>,
    /// Next LSN to hand out; starts at 1, strictly increasing, never reused.
    next_lsn: AtomicU64,
    health: Mutex<HealthTracker>,
    health_config: HealthConfig,
}

impl ShardedStore {
    pub fn new(config: &EngineConfig) -> Self {
        let shards = (0..config.shard_count)
            .map(|_| Arc::new(LruShard::new(config.capacity_per_shard)))
            .collect();

        Self {
            shards,
            consistency: tokio::sync::RwLock::new(()),
            wal: RwLock::new(None),
            next_lsn: AtomicU64::new(1),
            health: Mutex::new(HealthTracker {
                error_counts: HashMap::new(),
                disabled: HashSet::new(),
                last_check_ms: now_ms(),
            }),
            health_config: config.health.clone(),
        }
    }

    fn shard_index(&self, key: &Bytes) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    pub(crate) fn shards(&self) -> &[Arc<LruShard>] {
        &self.shards
    }

    // ==========================================
    // Basic cache API
    // ==========================================

    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        let idx = self.shard_index(key);
        if self.is_disabled(idx) {
            return None;
        }
        self.shards[idx].get(key)
    }

    /// Insert or overwrite. Applies to memory first; when persistence is on,
    /// a PUT record lands in the WAL buffer before the call returns, with
    /// durability deferred to the flusher. A write to a disabled shard is
    /// dropped after being recorded.
    pub async fn put(&self, key: Bytes, value: Bytes, ttl_ms: u64) -> Result<()> {
        let _consistency = self.consistency.read().await;

        let idx = self.shard_index(&key);
        if self.is_disabled(idx) {
            debug!(shard = idx, "put dropped: shard disabled");
            return Ok(());
        }

        self.next_lsn.fetch_add(1, Ordering::Relaxed);
        self.shards[idx].put(key.clone(), value.clone(), ttl_ms);

        if let Some(wal) = self.wal_handle() {
            let record = WalRecord::put(key, value, now_ms());
            if let Err(e) = wal.append(&record) {
                self.record_shard_error(idx);
                return Err(e);
            }
        }

        self.record_shard_success(idx);
        Ok(())
    }

    /// Log-before-ack variant: resolves `true` only once the PUT record has
    /// been fsynced through the group committer. Without persistence this is
    /// a plain memory put.
    pub async fn put_durable(&self, key: Bytes, value: Bytes, ttl_ms: u64) -> bool {
        let _consistency = self.consistency.read().await;

        let idx = self.shard_index(&key);
        if self.is_disabled(idx) {
            return false;
        }

        self.next_lsn.fetch_add(1, Ordering::Relaxed);
        self.shards[idx].put(key.clone(), value.clone(), ttl_ms);

        let wal = match self.wal_handle() {
            Some(wal) => wal,
            None => {
                self.record_shard_success(idx);
                return true;
            }
        };

        let record = WalRecord::put(key, value, now_ms());
        let ok = wal.append_durable(&record).await;
        if ok {
            self.record_shard_success(idx);
        } else {
            self.record_shard_error(idx);
        }
        ok
    }

    pub async fn remove(&self, key: &Bytes) -> Result<bool> {
        let _consistency = self.consistency.read().await;

        let idx = self.shard_index(key);
        if self.is_disabled(idx) {
            return Ok(false);
        }

        let removed = self.shards[idx].remove(key);
        if removed {
            self.next_lsn.fetch_add(1, Ordering::Relaxed);
            if let Some(wal) = self.wal_handle() {
                let record = WalRecord::delete(key.clone(), now_ms());
                if let Err(e) = wal.append(&record) {
                    self.record_shard_error(idx);
                    return Err(e);
                }
            }
        }

        self.record_shard_success(idx);
        Ok(removed)
    }

    /// Log-before-ack removal; `true` means the key was present and the
    /// DELETE record is durable.
    pub async fn remove_durable(&self, key: &Bytes) -> bool {
        let _consistency = self.consistency.read().await;

        let idx = self.shard_index(key);
        if self.is_disabled(idx) {
            return false;
        }

        let removed = self.shards[idx].remove(key);
        if !removed {
            return false;
        }
        self.next_lsn.fetch_add(1, Ordering::Relaxed);

        let wal = match self.wal_handle() {
            Some(wal) => wal,
            None => return true,
        };
        let record = WalRecord::delete(key.clone(), now_ms());
        let ok = wal.append_durable(&record).await;
        if ok {
            self.record_shard_success(idx);
        } else {
            self.record_shard_error(idx);
        }
        ok
    }

    pub fn size(&self) -> usize {
        self.enabled_shards().map(|(_, s)| s.size()).sum()
    }

    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|s| s.capacity()).sum()
    }

    pub async fn clear(&self) {
        let _exclusive = self.consistency.write().await;
        for (idx, shard) in self.shards.iter().enumerate() {
            if !self.is_disabled(idx) {
                shard.clear();
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for (_, shard) in self.enabled_shards() {
            total.merge(&shard.stats());
        }
        total
    }

    pub fn reset_stats(&self) {
        for (_, shard) in self.enabled_shards() {
            shard.reset_stats();
        }
    }

    fn enabled_shards(&self) -> impl Iterator<Item = (usize, &Arc<LruShard>)> {
        let disabled: HashSet<usize> = self.health.lock().disabled.iter().copied().collect();
        self.shards
            .iter()
            .enumerate()
            .filter(move |(idx, _)| !disabled.contains(idx))
    }

    // ==========================================
    // LSN
    // ==========================================

    /// Allocate the next LSN (returns the allocated value).
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::Relaxed)
    }

    /// Last LSN handed out; 0 if none yet.
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn.load(Ordering::Relaxed).saturating_sub(1)
    }

    // ==========================================
    // Persistence coupling
    // ==========================================

    pub fn attach_wal(&self, wal: Arc<WriteAheadLog>) {
        *self.wal.write() = Some(wal);
        info!("persistence attached to store");
    }

    pub fn detach_wal(&self) -> Option<Arc<WriteAheadLog>> {
        self.wal.write().take()
    }

    pub fn wal_handle(&self) -> Option<Arc<WriteAheadLog>> {
        self.wal.read().clone()
    }

    /// Restore-path put: no WAL record, no LSN. Recovery replays through
    /// this so replay stays idempotent and never re-logs.
    pub fn restore_put(&self, key: Bytes, value: Bytes) {
        let idx = self.shard_index(&key);
        self.shards[idx].put(key, value, 0);
    }

    pub fn restore_remove(&self, key: &Bytes) {
        let idx = self.shard_index(key);
        self.shards[idx].remove(key);
    }

    // ==========================================
    // Export (checkpoint support)
    // ==========================================

    /// Stop-the-world (for writers) lock used by the checkpoint protocol:
    /// LSN capture, export, and WAL truncation all happen under one hold.
    pub async fn lock_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.consistency.write().await
    }

    /// Collect every live entry. Caller must hold the exclusive lock (or
    /// tolerate a racy view).
    pub fn export_unlocked(&self) -> BTreeMap<Bytes, Bytes> {
        let mut all = BTreeMap::new();
        for (idx, shard) in self.shards.iter().enumerate() {
            if self.is_disabled(idx) {
                continue;
            }
            for (key, value) in shard.snapshot_entries() {
                all.insert(key, value);
            }
        }
        all
    }

    /// Consistent point-in-time export of the whole store.
    pub async fn export_all_data(&self) -> BTreeMap<Bytes, Bytes> {
        let _exclusive = self.consistency.write().await;
        let all = self.export_unlocked();
        info!(entries = all.len(), "exported store under consistency lock");
        all
    }

    // ==========================================
    // Shard health
    // ==========================================

    pub fn is_disabled(&self, shard: usize) -> bool {
        self.health.lock().disabled.contains(&shard)
    }

    pub fn record_shard_error(&self, shard: usize) {
        let mut health = self.health.lock();
        let count = health.error_counts.entry(shard).or_insert(0);
        *count += 1;
        let count = *count;
        if count >= self.health_config.max_consecutive_errors && health.disabled.insert(shard) {
            warn!(
                shard,
                errors = count,
                "shard disabled after consecutive errors"
            );
        }
    }

    pub fn record_shard_success(&self, shard: usize) {
        self.health.lock().error_counts.insert(shard, 0);
    }

    /// Probe disabled shards with a benign read and re-enable the ones that
    /// answer.
    pub fn perform_health_check(&self) {
        let mut health = self.health.lock();
        health.last_check_ms = now_ms();

        let candidates: Vec<usize> = health.disabled.iter().copied().collect();
        for shard in candidates {
            // A benign probe: a size query exercises the shard lock and its
            // interior structures without touching user data.
            let _ = self.shards[shard].size();
            health.error_counts.insert(shard, 0);
            health.disabled.remove(&shard);
            info!(shard, "shard recovered and re-enabled");
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        let health = self.health.lock();
        let total = self.shards.len();
        let healthy = total - health.disabled.len();
        let total_errors: u32 = health.error_counts.values().sum();
        let mut disabled: Vec<usize> = health.disabled.iter().copied().collect();
        disabled.sort_unstable();

        HealthStatus {
            overall_healthy: healthy > total / 2,
            healthy_shards: healthy,
            total_shards: total,
            disabled_shards: disabled,
            error_counts: health.error_counts.clone(),
            error_rate: total_errors as f64
                / (total as f64 * self.health_config.max_consecutive_errors as f64),
            last_health_check_ms: health.last_check_ms,
        }
    }
}
