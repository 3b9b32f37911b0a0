//! Checkpoint manager: point-in-time snapshots paired with WAL truncation.
//!
//! Recovery time is bounded by the WAL suffix since the last snapshot, so
//! checkpoints fire on two triggers (whichever comes first): a wall-clock
//! deadline since the previous checkpoint, or the WAL growing past a size
//! threshold.
//!
//! The checkpoint itself is stop-the-world for writers only: the store's
//! exclusive consistency lock covers LSN capture, export, snapshot write,
//! and WAL truncation, so no mutation can straddle the boundary. A crash
//! after the snapshot is durable but before truncation merely replays
//! records the snapshot already contains; PUT/DELETE replay is idempotent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use shirokv_core::config::CheckpointConfig;
use shirokv_core::error::{Error, Result};
use shirokv_core::utils::{format_bytes, now_ms};

use crate::snapshot::{list_snapshots, read_snapshot, snapshot_path, write_snapshot};
use crate::store::ShardedStore;
use crate::wal::WalOp;

#[derive(Debug, Clone, Default)]
pub struct CheckpointStats {
    pub last_checkpoint_time_ms: u64,
    pub last_checkpoint_records: usize,
    pub total_checkpoints: u64,
    pub last_snapshot_file: Option<PathBuf>,
    pub avg_duration_ms: u64,
}

pub struct CheckpointManager {
    store: Arc<ShardedStore>,
    snapshots_dir: PathBuf,
    config: CheckpointConfig,
    stats: Mutex<CheckpointStats>,
    checker: Mutex<Option<watch::Sender<bool>>>,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<ShardedStore>,
        data_dir: impl AsRef<Path>,
        config: CheckpointConfig,
    ) -> Result<Self> {
        let snapshots_dir = data_dir.as_ref().join("snapshots");
        std::fs::create_dir_all(&snapshots_dir).map_err(|e| Error::Io {
            message: format!("failed to create snapshots dir {:?}", snapshots_dir),
            source: e,
        })?;

        Ok(Self {
            store,
            snapshots_dir,
            config,
            stats: Mutex::new(CheckpointStats {
                last_checkpoint_time_ms: now_ms(),
                ..Default::default()
            }),
            checker: Mutex::new(None),
        })
    }

    /// Run the atomic checkpoint protocol now. Returns `false` on any step
    /// failure; a partial snapshot file is left for the next rotation to
    /// clean up.
    pub async fn checkpoint_now(&self) -> bool {
        let started = Instant::now();

        // Steps under the exclusive lock: writers stall, readers proceed.
        let exported;
        let wal_lsn;
        let timestamp;
        let path;
        {
            let _exclusive = self.store.lock_exclusive().await;

            wal_lsn = self.store.current_lsn();
            exported = self.store.export_unlocked();
            timestamp = now_ms();
            path = snapshot_path(&self.snapshots_dir, timestamp);

            if let Err(e) = write_snapshot(&path, &exported, wal_lsn, timestamp) {
                error!(error = %e, path = ?path, "snapshot write failed");
                return false;
            }

            if let Some(wal) = self.store.wal_handle() {
                if let Err(e) = wal.clear_all() {
                    error!(error = %e, "WAL truncation failed after snapshot");
                    return false;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            records = exported.len(),
            wal_lsn,
            duration_ms,
            path = ?path,
            "checkpoint completed"
        );

        self.rotate_snapshots();

        let mut stats = self.stats.lock();
        stats.total_checkpoints += 1;
        stats.last_checkpoint_time_ms = timestamp;
        stats.last_checkpoint_records = exported.len();
        stats.last_snapshot_file = Some(path);
        stats.avg_duration_ms = if stats.total_checkpoints == 1 {
            duration_ms
        } else {
            (stats.avg_duration_ms * (stats.total_checkpoints - 1) + duration_ms)
                / stats.total_checkpoints
        };
        true
    }

    /// Dual-trigger check: time since last checkpoint, or WAL size.
    pub fn should_checkpoint(&self) -> bool {
        let last = self.stats.lock().last_checkpoint_time_ms;
        let elapsed_ms = now_ms().saturating_sub(last);
        if elapsed_ms >= self.config.time_threshold.as_millis() as u64 {
            info!(elapsed_ms, "checkpoint trigger: time threshold");
            return true;
        }

        if let Some(wal) = self.store.wal_handle() {
            let wal_size = wal.log_size();
            if wal_size >= self.config.wal_size_threshold {
                info!(
                    wal_size = %format_bytes(wal_size),
                    threshold = %format_bytes(self.config.wal_size_threshold),
                    "checkpoint trigger: WAL size threshold"
                );
                return true;
            }
        }
        false
    }

    /// Keep the newest `keep_snapshot_count` snapshots, delete the rest.
    pub fn rotate_snapshots(&self) {
        let snapshots = list_snapshots(&self.snapshots_dir);
        for (ts, path) in snapshots.into_iter().skip(self.config.keep_snapshot_count) {
            match std::fs::remove_file(&path) {
                Ok(()) => info!(timestamp = ts, path = ?path, "rotated old snapshot"),
                Err(e) => warn!(error = %e, path = ?path, "failed to remove old snapshot"),
            }
        }
    }

    /// Restore the store from the newest valid snapshot plus the WAL suffix.
    ///
    /// Both phases use the store's restore path: nothing is re-logged, so
    /// running recovery twice yields the same state.
    pub fn recover_from_disk(&self) -> bool {
        let mut snapshot_lsn = 0;

        match list_snapshots(&self.snapshots_dir).into_iter().next() {
            Some((ts, path)) => match read_snapshot(&path) {
                Ok((data, header)) => {
                    snapshot_lsn = header.wal_lsn;
                    let count = data.len();
                    for (key, value) in data {
                        self.store.restore_put(key, value);
                    }
                    info!(
                        records = count,
                        wal_lsn = snapshot_lsn,
                        timestamp = ts,
                        "snapshot loaded"
                    );
                }
                Err(e) => {
                    warn!(error = %e, path = ?path, "snapshot invalid; starting from empty store");
                }
            },
            None => info!("no snapshot found; starting from empty store"),
        }

        let Some(wal) = self.store.wal_handle() else {
            return true;
        };

        let mut replayed = 0usize;
        for record in wal.iter() {
            match record.op {
                WalOp::Put => {
                    self.store.restore_put(record.key, record.value);
                    replayed += 1;
                }
                WalOp::Delete => {
                    self.store.restore_remove(&record.key);
                    replayed += 1;
                }
                WalOp::Snapshot => {}
            }
        }
        info!(
            replayed,
            snapshot_lsn,
            final_size = self.store.size(),
            "WAL replay completed"
        );
        true
    }

    pub fn stats(&self) -> CheckpointStats {
        self.stats.lock().clone()
    }

    /// Periodic trigger evaluation on a background task.
    pub fn start_background_checker(self: &Arc<Self>) {
        let mut checker = self.checker.lock();
        if checker.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let period = self.config.check_interval;

        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The immediate first tick would checkpoint at startup; skip it.
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if manager.should_checkpoint() && !manager.checkpoint_now().await {
                            error!("automatic checkpoint failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("checkpoint checker stopped");
                        break;
                    }
                }
            }
        });

        *checker = Some(shutdown_tx);
        info!(
            interval_s = period.as_secs(),
            "checkpoint checker started"
        );
    }

    pub fn stop_background_checker(&self) {
        if let Some(shutdown) = self.checker.lock().take() {
            let _ = shutdown.send(true);
        }
    }
}

impl Drop for CheckpointManager {
    fn drop(&mut self) {
        self.stop_background_checker();
    }
}
