//! nil-client: multi-backend retrieval client for NilStore
//!
//! This crate provides:
//! 1. The transport router: ordered fallback across gateway, direct
//!    storage provider and peer overlay backends, with error classification
//!    and a decision trace for every routed operation
//! 2. The HTTP client for the `/gateway/*` surface all backends speak
//! 3. A provider directory resolving advertised multiaddrs, cached with a TTL
//! 4. The retrieval session orchestrator running fast-path and metered
//!    retrievals against a [`nil_chain::Ledger`] and [`nil_chain::IntentSigner`]
//!
//! ## Usage
//!
//! ```no_run
//! use nil_chain::{EvmLedger, LedgerConfig, LocalIntentSigner};
//! use nil_client::{FetchRequest, RetrievalSession};
//! use nil_core::RetrievalConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RetrievalConfig::for_gateway("http://localhost:8080");
//!     let ledger = EvmLedger::connect(LedgerConfig::from_retrieval_config(&config, None)).await?;
//!     let signer = LocalIntentSigner::from_hex("0x...", config.chain_id)?;
//!
//!     let mut session = RetrievalSession::new(config, ledger, signer)?;
//!     let req = FetchRequest::new("0xroot", 1, "nil1owner", "video.mp4").with_range(0, 1 << 20);
//!     let outcome = session.fetch_file(&req).await?;
//!     println!("{} bytes via {:?}", outcome.bytes.len(), outcome.mode);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod progress;
pub mod session;
pub mod transport;

pub use cache::{ByteCache, MemoryByteCache};
pub use directory::{ProviderDirectory, ProviderEndpoints};
pub use error::{Result, RetrievalError};
pub use gateway::{FileLocator, NilHttpClient, NilfsFileEntry, RangeAuth, RetrievalPlan};
pub use progress::{FetchPhase, FetchProgress, ReceiptStatus};
pub use session::{FetchMode, FetchOutcome, FetchRequest, RetrievalSession};
pub use transport::{
    execute_with_fallback, order_candidates, DecisionTrace, ErrorClass, RouterError, RouterOptions,
    TransportCandidate, TransportError, TransportOutcome,
};
