//! # KV Engine
//!
//! The unified facade binding the sharded store, persistence, expiration,
//! and vector search.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         KvEngine                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  Write path:                                                │
//! │  ┌───────┐   ┌──────────────┐   ┌─────────────────┐         │
//! │  │ put() │──►│ ShardedStore │──►│ WAL (buffered)  │         │
//! │  └───────┘   └──────────────┘   └───────┬─────────┘         │
//! │  put_durable() ────────────────► GroupCommitter ──► fsync   │
//! │                                                             │
//! │  Background: WAL flusher · checkpoint checker ·             │
//! │              expiration reaper · shard health probe         │
//! │                                                             │
//! │  Read path: get() ──► shard lock only, never disk           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All services are owned by the engine: nothing global, every worker stops
//! when the engine is dropped or its service is stopped explicitly.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use shirokv_core::config::{EngineConfig, ExpirationConfig, WalConfig};
use shirokv_core::error::Result;
use shirokv_core::stats::CacheStats;

use crate::checkpoint::{CheckpointManager, CheckpointStats};
use crate::group_commit::CommitStats;
use crate::reaper::{sweep_once, ExpirationReaper, ReaperStats};
use crate::store::{HealthStatus, ShardedStore};
use crate::vector;
use crate::wal::WriteAheadLog;

pub struct KvEngine {
    config: EngineConfig,
    store: Arc<ShardedStore>,
    checkpoints: Mutex<Option<Arc<CheckpointManager>>>,
    reaper: Mutex<Option<ExpirationReaper>>,
    health_probe: Mutex<Option<watch::Sender<bool>>>,
}

impl KvEngine {
    /// Create an engine with no persistence and no background services
    /// beyond the shard health probe. Must be called within a tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(ShardedStore::new(&config));

        let engine = Self {
            config,
            store,
            checkpoints: Mutex::new(None),
            reaper: Mutex::new(None),
            health_probe: Mutex::new(None),
        };
        engine.start_health_probe();
        Ok(engine)
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(EngineConfig::default())
    }

    // ==========================================
    // Basic KV API
    // ==========================================

    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        self.store.get(key)
    }

    /// Insert or overwrite; `ttl_ms` of 0 means the entry never expires.
    pub async fn put(&self, key: Bytes, value: Bytes, ttl_ms: u64) -> Result<()> {
        self.store.put(key, value, ttl_ms).await
    }

    /// Log-before-ack put: `true` only once the record is fsynced (always
    /// `true` when persistence is off, since memory is then the only home).
    pub async fn put_durable(&self, key: Bytes, value: Bytes, ttl_ms: u64) -> bool {
        self.store.put_durable(key, value, ttl_ms).await
    }

    pub async fn remove(&self, key: &Bytes) -> Result<bool> {
        self.store.remove(key).await
    }

    pub async fn remove_durable(&self, key: &Bytes) -> bool {
        self.store.remove_durable(key).await
    }

    pub fn size(&self) -> usize {
        self.store.size()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub async fn clear(&self) {
        self.store.clear().await;
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn reset_stats(&self) {
        self.store.reset_stats();
    }

    // ==========================================
    // Persistence
    // ==========================================

    /// Attach a WAL under `data_dir` and start the background flusher and
    /// checkpoint checker. No-op if persistence is already enabled.
    pub fn enable_persistence(
        &self,
        data_dir: impl AsRef<Path>,
        fsync_interval: Duration,
    ) -> Result<()> {
        if self.store.wal_handle().is_some() {
            return Ok(());
        }

        let data_dir = data_dir.as_ref();
        let wal_config = WalConfig {
            buffer_size: self.config.wal.buffer_size,
            fsync_interval,
        };
        let wal = Arc::new(WriteAheadLog::open(
            data_dir,
            wal_config,
            self.config.group_commit.clone(),
        )?);
        wal.start_background_flush();
        self.store.attach_wal(wal);

        let manager = Arc::new(CheckpointManager::new(
            Arc::clone(&self.store),
            data_dir,
            self.config.checkpoint.clone(),
        )?);
        manager.start_background_checker();
        *self.checkpoints.lock() = Some(manager);

        info!(data_dir = ?data_dir, "persistence enabled");
        Ok(())
    }

    /// Flush and detach the WAL, stop the checkpoint checker. In-memory data
    /// is untouched.
    pub async fn disable_persistence(&self) {
        if let Some(manager) = self.checkpoints.lock().take() {
            manager.stop_background_checker();
        }
        if let Some(wal) = self.store.detach_wal() {
            wal.shutdown().await;
            info!("persistence disabled");
        }
    }

    /// Load the newest valid snapshot, then replay the WAL suffix. Both via
    /// the restore path, so nothing is re-logged and recovery is idempotent.
    pub fn recover_from_disk(&self) -> bool {
        match self.checkpoints.lock().clone() {
            Some(manager) => manager.recover_from_disk(),
            None => false,
        }
    }

    /// Run the atomic checkpoint protocol now.
    pub async fn create_snapshot(&self) -> bool {
        let manager = self.checkpoints.lock().clone();
        match manager {
            Some(manager) => manager.checkpoint_now().await,
            None => false,
        }
    }

    /// Truncate the WAL under the exclusive consistency lock.
    pub async fn clear_wal(&self) -> Result<()> {
        if let Some(wal) = self.store.wal_handle() {
            let _exclusive = self.store.lock_exclusive().await;
            wal.clear_all()?;
        }
        Ok(())
    }

    /// Consistent point-in-time export of every live entry.
    pub async fn export_all_data(&self) -> std::collections::BTreeMap<Bytes, Bytes> {
        self.store.export_all_data().await
    }

    pub fn checkpoint_stats(&self) -> Option<CheckpointStats> {
        self.checkpoints.lock().as_ref().map(|m| m.stats())
    }

    pub fn commit_stats(&self) -> Option<CommitStats> {
        self.store.wal_handle().map(|wal| wal.commit_stats())
    }

    // ==========================================
    // Expiration service
    // ==========================================

    pub fn start_expiration_service(&self, check_interval: Duration, sample_size: usize) {
        let mut reaper = self.reaper.lock();
        if reaper.is_some() {
            return;
        }
        *reaper = Some(ExpirationReaper::start(
            Arc::clone(&self.store),
            ExpirationConfig {
                check_interval,
                sample_size,
            },
        ));
    }

    pub fn stop_expiration_service(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.stop();
        }
    }

    pub fn expiration_stats(&self) -> ReaperStats {
        self.reaper
            .lock()
            .as_ref()
            .map(|r| r.stats())
            .unwrap_or_default()
    }

    /// One synchronous reaper-style sweep over all shards; returns the
    /// number of keys expired.
    pub fn manual_expiration(&self) -> u64 {
        sweep_once(&self.store, self.config.expiration.sample_size)
    }

    // ==========================================
    // Vector API
    // ==========================================

    pub async fn vector_put(&self, key: Bytes, vec: &[f32], ttl_ms: u64) -> Result<()> {
        self.store
            .put(key, vector::encode_vector(vec), ttl_ms)
            .await
    }

    /// The stored vector, or empty if the key is absent or the value is not
    /// a vector image.
    pub fn vector_get(&self, key: &Bytes) -> Vec<f32> {
        self.store
            .get(key)
            .and_then(|raw| vector::decode_vector(&raw))
            .unwrap_or_default()
    }

    /// Keys of the k nearest vectors, ascending by squared Euclidean
    /// distance.
    pub fn vector_search(&self, query: &[f32], k: usize) -> Vec<Bytes> {
        vector::search(&self.store, query, k)
    }

    // ==========================================
    // Health and LSN
    // ==========================================

    pub fn health_status(&self) -> HealthStatus {
        self.store.health_status()
    }

    pub fn perform_health_check(&self) {
        self.store.perform_health_check();
    }

    pub fn current_lsn(&self) -> u64 {
        self.store.current_lsn()
    }

    pub fn next_lsn(&self) -> u64 {
        self.store.next_lsn()
    }

    fn start_health_probe(&self) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let period = self.config.health.check_interval;

        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick.tick().await; // skip the immediate first fire

            loop {
                tokio::select! {
                    _ = tick.tick() => store.perform_health_check(),
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *self.health_probe.lock() = Some(shutdown_tx);
    }
}

impl Drop for KvEngine {
    fn drop(&mut self) {
        self.stop_expiration_service();
        if let Some(manager) = self.checkpoints.lock().take() {
            manager.stop_background_checker();
        }
        if let Some(probe) = self.health_probe.lock().take() {
            let _ = probe.send(true);
        }
        if let Some(wal) = self.store.detach_wal() {
            wal.stop_background_flush();
        }
    }
}
