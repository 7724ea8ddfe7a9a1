//! Ledger and signer error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Transaction {tx_hash} not included after {waited_ms} ms")]
    InclusionTimeout { tx_hash: String, waited_ms: u64 },

    #[error("Invalid address {value}: {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Ledger returned {actual} sessions, expected {expected}")]
    SessionCountMismatch { expected: usize, actual: usize },

    #[error("Core error: {0}")]
    Core(#[from] nil_core::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;
