//! Backend-agnostic transport: error classes and the fallback router

mod error;
mod router;

pub use error::{classify_message, ErrorClass, TransportError};
pub use router::{
    execute_with_fallback, order_candidates, ChosenBackend, DecisionTrace, RouterError, RouterOptions,
    TransportAttempt, TransportCandidate, TransportOutcome,
};

pub(crate) use router::unix_ms;
