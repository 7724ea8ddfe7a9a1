//! Retrieval error types

use thiserror::Error;

use nil_chain::ChainError;
use nil_core::PlanError;

use crate::transport::RouterError;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Core error: {0}")]
    Core(#[from] nil_core::Error),

    #[error("Ledger error: {0}")]
    Chain(#[from] ChainError),

    #[error("{0}")]
    Router(#[from] RouterError),

    #[error("File {file_path} not found in deal {deal_id}")]
    FileNotFound { deal_id: u64, file_path: String },

    #[error("Ledger session {index} is for {actual}, expected {expected}")]
    SessionProviderMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Ledger session id for {provider} does not match the local computation")]
    SessionIdMismatch { provider: String },

    #[error("Short read for chunk {index}: expected {expected} bytes, got {actual}")]
    ShortRead { index: usize, expected: u64, actual: u64 },

    #[error("Incomplete download: {} of {total} chunks missing", .missing.len())]
    IncompleteDownload { missing: Vec<usize>, total: usize },

    #[error("Receipt failed for provider {provider}: {reason}")]
    ReceiptFailed { provider: String, reason: String },
}

impl RetrievalError {
    /// Decision trace of the failed routed operation, if any
    pub fn trace(&self) -> Option<&crate::transport::DecisionTrace> {
        match self {
            RetrievalError::Router(err) => Some(err.trace()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
