//! # shirokv Storage Engine
//!
//! An embeddable key-value store combining:
//! - a sharded, thread-safe LRU cache with per-entry TTL
//! - crash-durable persistence: write-ahead log with group commit, plus
//!   periodic checkpoint snapshots that truncate the log
//! - a sampling expiration reaper that never blocks the hot path
//! - brute-force vector-similarity search layered on the same storage
//!
//! ```no_run
//! use bytes::Bytes;
//! use shirokv_storage::KvEngine;
//!
//! # async fn demo() -> shirokv_core::Result<()> {
//! let engine = KvEngine::with_defaults()?;
//! engine.enable_persistence("./data", std::time::Duration::from_millis(1000))?;
//! engine.recover_from_disk();
//!
//! engine.put(Bytes::from("key1"), Bytes::from("value1"), 5000).await?;
//! let value = engine.get(&Bytes::from("key1"));
//!
//! engine.vector_put(Bytes::from("vec1"), &[1.0, 2.0, 3.0], 0).await?;
//! let nearest = engine.vector_search(&[1.1, 2.1, 3.1], 10);
//! # Ok(())
//! # }
//! ```

pub mod append_log;
pub mod checkpoint;
pub mod engine;
pub mod group_commit;
pub mod reaper;
pub mod shard;
pub mod simd;
pub mod snapshot;
pub mod store;
pub mod vector;
pub mod wal;

pub use checkpoint::{CheckpointManager, CheckpointStats};
pub use engine::KvEngine;
pub use group_commit::{CommitStats, GroupCommitter};
pub use reaper::{ExpirationReaper, ReaperStats};
pub use shard::LruShard;
pub use store::{HealthStatus, ShardedStore};
pub use wal::{WalOp, WalRecord, WalRecordIterator, WriteAheadLog};
