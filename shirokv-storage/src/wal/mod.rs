//! Write-Ahead Log: durable, replayable mutation log.
//!
//! ```text
//! append()          ──► in-memory buffer ──┐ drain on overflow / flush tick
//! append_durable()  ──► GroupCommitter ────┼──► wal.log (AppendLog)
//! read_all()        ◄── forward scan, stops at first corrupt record
//! clear_all()       ──► delete + reopen (checkpoint truncation)
//! ```
//!
//! The buffered path trades the tail of the log for latency: a crash can lose
//! records that were not yet drained. Callers that need log-before-ack use
//! `append_durable`, which routes through the group committer and resolves
//! only after fsync.

mod iterator;
mod record;

pub use iterator::WalRecordIterator;
pub use record::{WalOp, WalRecord};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use shirokv_core::config::{GroupCommitConfig, WalConfig};
use shirokv_core::error::{Error, Result};

use crate::append_log::AppendLog;
use crate::group_commit::{CommitStats, GroupCommitter};

pub const WAL_FILE_NAME: &str = "wal.log";

pub struct WriteAheadLog {
    wal_path: PathBuf,
    buffer_size: usize,
    fsync_interval: std::time::Duration,
    buffer: Mutex<Vec<u8>>,
    /// Shared with the group-commit worker so batch appends and buffer
    /// drains serialize on one handle.
    log: Arc<Mutex<AppendLog>>,
    committer: GroupCommitter,
    flusher: Mutex<Option<watch::Sender<bool>>>,
}

impl WriteAheadLog {
    /// Open (or create) `<data_dir>/wal.log` and start the group-commit
    /// worker. Must be called within a tokio runtime.
    pub fn open(
        data_dir: impl AsRef<Path>,
        config: WalConfig,
        commit_config: GroupCommitConfig,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).map_err(|e| Error::Io {
            message: format!("failed to create data dir {:?}", data_dir),
            source: e,
        })?;

        let wal_path = data_dir.join(WAL_FILE_NAME);
        let log = Arc::new(Mutex::new(AppendLog::open(&wal_path)?));
        let committer = GroupCommitter::start(Arc::clone(&log), commit_config);

        Ok(Self {
            wal_path,
            buffer_size: config.buffer_size,
            fsync_interval: config.fsync_interval,
            buffer: Mutex::new(Vec::with_capacity(config.buffer_size)),
            log,
            committer,
            flusher: Mutex::new(None),
        })
    }

    /// Buffered append. The record reaches the OS only on buffer overflow,
    /// an explicit `flush`, or the background flush tick.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let encoded = record.encode();
        let mut buffer = self.buffer.lock();

        if !buffer.is_empty() && buffer.len() + encoded.len() > self.buffer_size {
            Self::drain(&mut buffer, &self.log)?;
        }

        if encoded.len() >= self.buffer_size {
            // Oversized record: bypass the buffer entirely.
            self.log.lock().append(&encoded)?;
        } else {
            buffer.extend_from_slice(&encoded);
        }
        Ok(())
    }

    /// Durable append: drains any buffered records first (order is
    /// preserved), then rides the group committer. `true` means the record
    /// is on stable storage.
    pub async fn append_durable(&self, record: &WalRecord) -> bool {
        let encoded = record.encode();
        {
            let mut buffer = self.buffer.lock();
            if !buffer.is_empty() && Self::drain(&mut buffer, &self.log).is_err() {
                return false;
            }
        }
        self.committer.commit(encoded.into()).await
    }

    /// Drain the buffer and fsync the file.
    pub fn flush(&self) -> Result<()> {
        {
            let mut buffer = self.buffer.lock();
            Self::drain(&mut buffer, &self.log)?;
        }
        self.log.lock().sync()
    }

    fn drain(buffer: &mut Vec<u8>, log: &Arc<Mutex<AppendLog>>) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        log.lock().append(buffer)?;
        buffer.clear();
        Ok(())
    }

    /// Stream the log from the beginning. The iterator ends at clean EOF or
    /// at the first record that fails to decode; everything before a corrupt
    /// tail is still yielded.
    pub fn iter(&self) -> WalRecordIterator {
        if let Err(e) = self.flush() {
            warn!(error = %e, "WAL flush before read failed; scanning what is on disk");
        }
        WalRecordIterator::open(&self.wal_path)
    }

    /// All decodable records, in append order.
    pub fn read_all(&self) -> Vec<WalRecord> {
        self.iter().collect()
    }

    /// Truncate the log: delete the file and reopen it empty. Only called
    /// while the store's exclusive consistency lock is held, so no mutation
    /// can race the swap.
    pub fn clear_all(&self) -> Result<()> {
        self.buffer.lock().clear();

        let mut log = self.log.lock();
        if let Err(e) = std::fs::remove_file(&self.wal_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(Error::Io {
                    message: format!("failed to remove {:?}", self.wal_path),
                    source: e,
                });
            }
        }
        *log = AppendLog::open(&self.wal_path)?;
        info!(path = ?self.wal_path, "WAL truncated");
        Ok(())
    }

    /// On-disk size plus bytes still buffered; drives the checkpoint size
    /// trigger.
    pub fn log_size(&self) -> u64 {
        let on_disk = std::fs::metadata(&self.wal_path)
            .map(|m| m.len())
            .unwrap_or(0);
        on_disk + self.buffer.lock().len() as u64
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn commit_stats(&self) -> CommitStats {
        self.committer.stats()
    }

    /// Spawn the periodic drain-and-fsync task.
    pub fn start_background_flush(self: &Arc<Self>) {
        let mut flusher = self.flusher.lock();
        if flusher.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let wal = Arc::clone(self);
        let period = self.fsync_interval;

        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = wal.flush() {
                            warn!(error = %e, "background WAL flush failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("WAL background flush stopped");
                        break;
                    }
                }
            }
        });

        *flusher = Some(shutdown_tx);
        info!(interval_ms = period.as_millis() as u64, "WAL background flush started");
    }

    pub fn stop_background_flush(&self) {
        if let Some(shutdown) = self.flusher.lock().take() {
            let _ = shutdown.send(true);
        }
    }

    /// Stop the group-commit worker; pending durable waiters resolve false.
    pub async fn shutdown(&self) {
        self.stop_background_flush();
        let _ = self.flush();
        self.committer.stop().await;
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        self.stop_background_flush();
        if let Err(e) = self.flush() {
            warn!(error = %e, "final WAL flush on drop failed");
        }
    }
}
