//! Proactive TTL reaper.
//!
//! Expired keys that are never read again would otherwise sit in memory until
//! eviction. The reaper sweeps shards round-robin on its own task: it
//! `try_access`es each shard (skipping, never blocking, when the hot path
//! holds the lock), samples a handful of random keys, and removes the ones
//! past their deadline. Cycles that overrun the check interval roll straight
//! into the next one.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use shirokv_core::config::ExpirationConfig;

use crate::store::ShardedStore;

/// Cap on the expired-ratio history; halved when reached.
const RATIO_HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct ReaperStats {
    /// Completed sweep cycles
    pub total_cycles: u64,
    /// Keys removed because their TTL had passed
    pub total_expired: u64,
    /// Shard visits skipped due to lock contention
    pub total_skipped: u64,
    /// Mean observed expired fraction (expired / sampled), for operators
    /// tuning interval or sample size; the reaper itself does not auto-tune
    pub avg_expired_ratio: f64,
}

#[derive(Default)]
struct ReaperState {
    total_cycles: u64,
    total_expired: u64,
    total_skipped: u64,
    expired_ratios: Vec<f64>,
}

pub struct ExpirationReaper {
    shutdown: watch::Sender<bool>,
    state: Arc<Mutex<ReaperState>>,
}

impl ExpirationReaper {
    /// Spawn the sweep task. Must be called within a tokio runtime.
    pub fn start(store: Arc<ShardedStore>, config: ExpirationConfig) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(ReaperState::default()));

        let task_state = Arc::clone(&state);
        let sample_size = config.sample_size;
        let check_interval = config.check_interval;

        tokio::spawn(async move {
            let mut tick = interval(check_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let (expired, skipped, sampled) = sweep(&store, sample_size);
                        record_cycle(&task_state, expired, skipped, sampled);
                    }
                    _ = shutdown_rx.changed() => {
                        info!("expiration reaper stopped");
                        break;
                    }
                }
            }
        });

        info!(
            interval_ms = check_interval.as_millis() as u64,
            sample_size, "expiration reaper started"
        );

        Self {
            shutdown: shutdown_tx,
            state,
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn stats(&self) -> ReaperStats {
        let state = self.state.lock();
        let avg = if state.expired_ratios.is_empty() {
            0.0
        } else {
            state.expired_ratios.iter().sum::<f64>() / state.expired_ratios.len() as f64
        };
        ReaperStats {
            total_cycles: state.total_cycles,
            total_expired: state.total_expired,
            total_skipped: state.total_skipped,
            avg_expired_ratio: avg,
        }
    }
}

impl Drop for ExpirationReaper {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// One pass over every shard. Returns (expired, skipped, sampled).
fn sweep(store: &ShardedStore, sample_size: usize) -> (u64, u64, u64) {
    let mut expired = 0u64;
    let mut skipped = 0u64;
    let mut sampled = 0u64;

    for (idx, shard) in store.shards().iter().enumerate() {
        if store.is_disabled(idx) {
            continue;
        }
        match shard.try_access() {
            Some(mut access) => {
                let keys = access.sample(sample_size);
                sampled += keys.len() as u64;
                let n = access.expire_keys(&keys);
                if n > 0 {
                    debug!(shard = idx, expired = n, "reaper removed expired keys");
                }
                expired += n as u64;
            }
            None => skipped += 1,
        }
    }

    (expired, skipped, sampled)
}

fn record_cycle(state: &Arc<Mutex<ReaperState>>, expired: u64, skipped: u64, sampled: u64) {
    let mut state = state.lock();
    state.total_cycles += 1;
    state.total_expired += expired;
    state.total_skipped += skipped;

    if sampled > 0 {
        state.expired_ratios.push(expired as f64 / sampled as f64);
        if state.expired_ratios.len() > RATIO_HISTORY_CAP {
            state.expired_ratios.drain(..RATIO_HISTORY_CAP / 2);
        }
    }
}

/// Single synchronous sweep over all shards, outside the background service.
/// Exposed through the facade for tests and operational tooling.
pub fn sweep_once(store: &ShardedStore, sample_size: usize) -> u64 {
    sweep(store, sample_size).0
}
