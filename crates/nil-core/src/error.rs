//! Error types for nil-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Invalid hex for {field}: {reason}")]
    InvalidHex { field: String, reason: String },

    #[error("Invalid bech32 for {field}: {reason}")]
    InvalidBech32 { field: String, reason: String },

    #[error("Invalid length for {field}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Caller errors from the range planner. These are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("file size must be > 0")]
    ZeroFileSize,

    #[error("range length must be > 0")]
    ZeroRangeLength,

    #[error("range start {range_start} beyond EOF (file size {file_size})")]
    RangeStartBeyondEof { range_start: u64, file_size: u64 },

    #[error("invalid MDU size {0}: must hold at least one scalar")]
    InvalidMduSize(u64),

    #[error("invalid blob size {0}: must be > 0")]
    InvalidBlobSize(u64),

    #[error("offset overflow at cursor {0}")]
    OffsetOverflow(u64),

    #[error("failed to derive a positive chunk length at cursor {0}")]
    NonPositiveChunk(u64),
}
