//! Collector errors

use std::path::PathBuf;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::decode::DecodeError;

/// Errors raised while preparing or running the collector
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Preflight failed: {0}")]
    Preflight(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read eBPF bytecode from '{path}': {source}")]
    Bytecode {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load eBPF program: {0}")]
    Load(String),

    #[error("Failed to attach {program} to {category}/{tracepoint}: {reason}")]
    Attach {
        program: &'static str,
        category: &'static str,
        tracepoint: &'static str,
        reason: String,
    },

    #[error("Map {name} unavailable: {reason}")]
    Map { name: &'static str, reason: String },

    #[error("Collector already running")]
    AlreadyRunning,

    #[error("eBPF capture is only supported on Linux")]
    Unsupported,

    #[error("Polling task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for collector operations
pub type CaptureResult<T> = Result<T, CaptureError>;
