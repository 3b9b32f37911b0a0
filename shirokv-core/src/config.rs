//! # Configuration
//!
//! All tunables for the shirokv engine, grouped per component.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of shards the key space is partitioned into
    pub shard_count: usize,
    /// Maximum live entries per shard
    pub capacity_per_shard: usize,
    pub wal: WalConfig,
    pub group_commit: GroupCommitConfig,
    pub expiration: ExpirationConfig,
    pub checkpoint: CheckpointConfig,
    pub health: HealthConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: 16,
            capacity_per_shard: 1000,
            wal: WalConfig::default(),
            group_commit: GroupCommitConfig::default(),
            expiration: ExpirationConfig::default(),
            checkpoint: CheckpointConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(Error::Configuration {
                message: "shard_count must be at least 1".to_string(),
            });
        }
        if self.capacity_per_shard == 0 {
            return Err(Error::Configuration {
                message: "capacity_per_shard must be at least 1".to_string(),
            });
        }
        if self.wal.buffer_size == 0 {
            return Err(Error::Configuration {
                message: "wal.buffer_size must be non-zero".to_string(),
            });
        }
        if self.group_commit.batch_size == 0 {
            return Err(Error::Configuration {
                message: "group_commit.batch_size must be non-zero".to_string(),
            });
        }
        if self.expiration.sample_size == 0 {
            return Err(Error::Configuration {
                message: "expiration.sample_size must be non-zero".to_string(),
            });
        }
        if self.checkpoint.keep_snapshot_count == 0 {
            return Err(Error::Configuration {
                message: "checkpoint.keep_snapshot_count must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Write-ahead log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// In-memory buffer drained to disk when full or on the flush tick
    pub buffer_size: usize,
    /// Background flush-and-fsync interval
    pub fsync_interval: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024,
            fsync_interval: Duration::from_millis(1000),
        }
    }
}

/// Group commit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCommitConfig {
    /// Accumulated bytes that force a batch flush
    pub batch_size: usize,
    /// Maximum age of the oldest request before the batch flushes anyway
    pub flush_interval: Duration,
}

impl Default for GroupCommitConfig {
    fn default() -> Self {
        Self {
            batch_size: 4096,
            flush_interval: Duration::from_millis(10),
        }
    }
}

/// Expiration reaper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// Pause between sweep cycles (a cycle that overruns starts the next
    /// one immediately)
    pub check_interval: Duration,
    /// Keys sampled per shard per cycle
    pub sample_size: usize,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(100),
            sample_size: 20,
        }
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Time since last checkpoint that forces one
    pub time_threshold: Duration,
    /// WAL size that forces one
    pub wal_size_threshold: u64,
    /// How often the background checker evaluates the triggers
    pub check_interval: Duration,
    /// Snapshots retained after rotation
    pub keep_snapshot_count: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            time_threshold: Duration::from_secs(60 * 60),
            wal_size_threshold: 64 * 1024 * 1024,
            check_interval: Duration::from_secs(10 * 60),
            keep_snapshot_count: 3,
        }
    }
}

/// Shard health tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Consecutive errors after which a shard is taken out of service
    pub max_consecutive_errors: u32,
    /// How often disabled shards are probed for re-enable
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 5,
            check_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_shards_rejected() {
        let cfg = EngineConfig {
            shard_count: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_sample_size_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.expiration.sample_size = 0;
        assert!(cfg.validate().is_err());
    }
}
