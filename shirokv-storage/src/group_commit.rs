//! Group commit: batch concurrent durable-write requests into one fsync.
//!
//! ```text
//!  Writer 1 ──┐
//!  Writer 2 ──┼──► Channel ──► Worker Task ──► append×N + one fsync
//!  Writer 3 ──┘                    │
//!                                  └── oneshot per request: shared fate
//! ```
//!
//! A batch flushes when either the accumulated bytes reach
//! `GroupCommitConfig::batch_size` or the oldest pending request has waited
//! `flush_interval`. Every request in a batch observes the same outcome; an
//! I/O failure fails the whole batch and the worker keeps serving subsequent
//! batches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use shirokv_core::config::GroupCommitConfig;

use crate::append_log::AppendLog;

/// Worker queue depth; writers briefly backpressure when it fills.
const CHANNEL_DEPTH: usize = 1024;

enum Command {
    Commit { data: Bytes, done: oneshot::Sender<bool> },
    /// Flush barrier: cuts the current batch short and confirms once
    /// everything enqueued before it is durable.
    Flush { done: oneshot::Sender<bool> },
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct CommitStats {
    pub total_commits: u64,
    pub total_batches: u64,
    pub total_bytes: u64,
}

impl CommitStats {
    /// Average requests amortized per fsync.
    pub fn avg_batch_len(&self) -> f64 {
        if self.total_batches > 0 {
            self.total_commits as f64 / self.total_batches as f64
        } else {
            0.0
        }
    }
}

struct StatsInner {
    total_commits: AtomicU64,
    total_batches: AtomicU64,
    total_bytes: AtomicU64,
}

pub struct GroupCommitter {
    tx: mpsc::Sender<Command>,
    stats: Arc<StatsInner>,
}

impl GroupCommitter {
    /// Start the worker task writing through `log`. The log handle is shared
    /// with the WAL's buffered drain path, so batch appends and buffer drains
    /// serialize on the same lock.
    pub fn start(log: Arc<Mutex<AppendLog>>, config: GroupCommitConfig) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let stats = Arc::new(StatsInner {
            total_commits: AtomicU64::new(0),
            total_batches: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        });

        let worker_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            commit_loop(rx, log, config, worker_stats).await;
        });

        Self { tx, stats }
    }

    /// Enqueue bytes for the next batch; the receiver resolves to the batch
    /// outcome. Resolves `false` immediately if the committer has stopped.
    pub async fn submit(&self, data: Bytes) -> oneshot::Receiver<bool> {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Commit { data, done: done_tx })
            .await
            .is_err()
        {
            // Worker gone; the dropped sender resolves the receiver as Err,
            // which callers map to false.
        }
        done_rx
    }

    /// Block until the batch containing this request is on stable storage.
    pub async fn commit(&self, data: Bytes) -> bool {
        self.submit(data).await.await.unwrap_or(false)
    }

    /// Force the current batch out without waiting for size or interval.
    pub async fn flush(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush { done: done_tx }).await.is_err() {
            return false;
        }
        done_rx.await.unwrap_or(false)
    }

    /// Stop the worker. Requests still queued behind the shutdown marker are
    /// failed; subsequent submissions resolve `false`.
    pub async fn stop(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    pub fn stats(&self) -> CommitStats {
        CommitStats {
            total_commits: self.stats.total_commits.load(Ordering::Relaxed),
            total_batches: self.stats.total_batches.load(Ordering::Relaxed),
            total_bytes: self.stats.total_bytes.load(Ordering::Relaxed),
        }
    }
}

async fn commit_loop(
    mut rx: mpsc::Receiver<Command>,
    log: Arc<Mutex<AppendLog>>,
    config: GroupCommitConfig,
    stats: Arc<StatsInner>,
) {
    'outer: loop {
        // Wait for the first request of a batch.
        let first = match rx.recv().await {
            Some(cmd) => cmd,
            None => break,
        };

        let mut batch: Vec<(Bytes, oneshot::Sender<bool>)> = Vec::new();
        let mut flushers: Vec<oneshot::Sender<bool>> = Vec::new();
        let mut batch_bytes = 0usize;
        let mut shutdown = false;
        let mut cut_short = false;

        match first {
            Command::Commit { data, done } => {
                batch_bytes += data.len();
                batch.push((data, done));
            }
            Command::Flush { done } => {
                // Nothing pending ahead of the barrier; acknowledge as soon
                // as the (empty) batch completes.
                flushers.push(done);
                cut_short = true;
            }
            Command::Shutdown => break,
        }

        // Accumulate until the size threshold, the flush interval measured
        // from the first request, a flush barrier, or shutdown.
        let deadline = tokio::time::Instant::now() + config.flush_interval;
        while !cut_short && batch_bytes < config.batch_size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(Command::Commit { data, done })) => {
                    batch_bytes += data.len();
                    batch.push((data, done));
                }
                Ok(Some(Command::Flush { done })) => {
                    flushers.push(done);
                    cut_short = true;
                }
                Ok(Some(Command::Shutdown)) => {
                    shutdown = true;
                    cut_short = true;
                }
                Ok(None) => {
                    shutdown = true;
                    cut_short = true;
                }
                Err(_) => break, // interval elapsed
            }
        }

        let ok = write_batch(&log, &batch);
        if !ok {
            error!(
                requests = batch.len(),
                bytes = batch_bytes,
                "group commit batch failed; notifying all waiters"
            );
        }

        let committed = batch.len() as u64;

        // Same fate for every request in the batch.
        for (_, done) in batch.drain(..) {
            let _ = done.send(ok);
        }
        for done in flushers.drain(..) {
            let _ = done.send(ok);
        }

        if ok && committed > 0 {
            stats.total_commits.fetch_add(committed, Ordering::Relaxed);
            stats.total_batches.fetch_add(1, Ordering::Relaxed);
            stats.total_bytes.fetch_add(batch_bytes as u64, Ordering::Relaxed);
        }

        if shutdown {
            break 'outer;
        }
    }

    // Fail anything still queued so no waiter hangs.
    rx.close();
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            Command::Commit { done, .. } | Command::Flush { done } => {
                let _ = done.send(false);
            }
            Command::Shutdown => {}
        }
    }
    info!("group commit worker stopped");
}

fn write_batch(log: &Arc<Mutex<AppendLog>>, batch: &[(Bytes, oneshot::Sender<bool>)]) -> bool {
    if batch.is_empty() {
        return true;
    }

    let mut log = log.lock();
    for (data, _) in batch {
        if let Err(e) = log.append(data) {
            error!(error = %e, "group commit append failed");
            return false;
        }
    }
    if let Err(e) = log.sync() {
        error!(error = %e, "group commit fsync failed");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn committer(tmp: &TempDir) -> (GroupCommitter, std::path::PathBuf) {
        let path = tmp.path().join("commit.log");
        let log = Arc::new(Mutex::new(AppendLog::open(&path).unwrap()));
        (
            GroupCommitter::start(log, GroupCommitConfig::default()),
            path,
        )
    }

    #[tokio::test]
    async fn commit_is_durable_and_ordered() {
        let tmp = TempDir::new().unwrap();
        let (gc, path) = committer(&tmp);

        assert!(gc.commit(Bytes::from_static(b"aaa")).await);
        assert!(gc.commit(Bytes::from_static(b"bbb")).await);

        assert_eq!(std::fs::read(&path).unwrap(), b"aaabbb");
    }

    #[tokio::test]
    async fn concurrent_commits_share_batches() {
        let tmp = TempDir::new().unwrap();
        let (gc, path) = committer(&tmp);
        let gc = Arc::new(gc);

        let mut handles = Vec::new();
        for i in 0..32u8 {
            let gc = Arc::clone(&gc);
            handles.push(tokio::spawn(async move {
                gc.commit(Bytes::from(vec![i; 8])).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }

        let stats = gc.stats();
        assert_eq!(stats.total_bytes, 32 * 8);
        assert!(stats.total_batches >= 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32 * 8);
    }

    #[tokio::test]
    async fn flush_forces_batch_out() {
        let tmp = TempDir::new().unwrap();
        let (gc, path) = committer(&tmp);

        let rx = gc.submit(Bytes::from_static(b"pending")).await;
        assert!(gc.flush().await);
        assert!(rx.await.unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"pending");
    }

    #[tokio::test]
    async fn stop_fails_later_commits() {
        let tmp = TempDir::new().unwrap();
        let (gc, _path) = committer(&tmp);

        gc.stop().await;
        // Give the worker a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!gc.commit(Bytes::from_static(b"late")).await);
    }
}
