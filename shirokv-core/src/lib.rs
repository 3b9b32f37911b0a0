//! # shirokv Core
//!
//! Foundation crate for the shirokv engine:
//! - Error types
//! - Configuration
//! - Cache statistics
//! - Common utilities
//!
//! The storage engine itself lives in `shirokv-storage`; this crate has no
//! I/O and no runtime dependencies beyond serde/thiserror.

pub mod config;
pub mod error;
pub mod stats;
pub mod utils;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use stats::CacheStats;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
