//! Ledger and signer collaborators for metered retrievals
//!
//! This crate provides:
//! 1. The [`Ledger`] contract the retrieval orchestrator consumes: a
//!    read-only session id computation plus batched open/confirm transactions
//! 2. [`EvmLedger`], which speaks that contract to the storage precompile
//!    over EVM JSON-RPC
//! 3. The [`IntentSigner`] contract and a local private-key implementation
//!    producing EIP-712 signatures over fixed intent shapes
//!
//! ## Usage
//!
//! ```no_run
//! use nil_chain::{EvmLedger, Ledger, LedgerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nil_chain::ChainError> {
//!     let ledger = EvmLedger::connect(LedgerConfig::default()).await?;
//!     let height = ledger.block_number().await?;
//!     println!("chain height {}", height);
//!     Ok(())
//! }
//! ```

mod abi;
mod error;
mod ledger;
mod signer;

pub use abi::{ComputedSessionAbi, RetrievalRequest, SessionParams};
pub use error::{ChainError, Result};
pub use ledger::{ComputedSession, EvmLedger, Ledger, LedgerConfig, SessionRequest, TxOutcome};
pub use signer::{nilstore_domain, IntentSigner, LocalIntentSigner, RetrievalRequestIntent};
