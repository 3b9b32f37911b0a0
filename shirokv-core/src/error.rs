//! # Error Handling
//!
//! Error types shared by every shirokv component.
//!
//! ## Design Principles
//!
//! 1. **Degradable**: shard-level failures degrade to "absent" at the read
//!    path; they are recorded, not propagated
//! 2. **Contextual**: errors carry the message and, where available, the
//!    underlying I/O source
//! 3. **Recoverable**: callers can distinguish fatal corruption from
//!    conditions the engine rides through

use thiserror::Error;

/// Result type alias for shirokv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for shirokv
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    #[error("WAL error: {message}")]
    WriteAheadLog {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("snapshot error: {message}")]
    Snapshot { message: String },

    #[error("corruption detected: {details}")]
    Corruption { details: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("shard {shard} is disabled")]
    ShardDisabled { shard: usize },

    #[error("engine is shut down")]
    Shutdown,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Whether the engine can continue serving after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io { .. } => false,
            Error::Corruption { .. } => false,
            Error::Shutdown => false,
            _ => true,
        }
    }

    /// Stable code for monitoring and log aggregation.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Io { .. } => "IO_ERROR",
            Error::WriteAheadLog { .. } => "WAL_ERROR",
            Error::Snapshot { .. } => "SNAPSHOT_ERROR",
            Error::Corruption { .. } => "CORRUPTION",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::ShardDisabled { .. } => "SHARD_DISABLED",
            Error::Shutdown => "SHUTDOWN",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
