//! NilStore retrieval client
//!
//! Umbrella crate over the workspace members:
//!
//! - [`core`]: range planner, session grouping, session ids, config
//! - [`chain`]: ledger precompile access and intent signing
//! - [`client`]: transport router, gateway client and retrieval orchestrator

pub use nil_chain as chain;
pub use nil_client as client;
pub use nil_core as core;
