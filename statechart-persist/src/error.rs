//! Persistence error types.

use thiserror::Error;

/// Errors from encoding, storing or restoring contexts.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("codec error: {reason}")]
    Codec { reason: String },

    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("unsupported context version: {0}")]
    UnsupportedVersion(u16),

    #[error("invalid record header: {0}")]
    InvalidHeader(String),

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("no context stored under '{key}'")]
    NotFound { key: String },

    #[error("core error: {0}")]
    Core(#[from] statechart_core::CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
