//! Retrieval metrics
//!
//! Only backend, operation and outcome labels; never deal ids or paths.

use metrics::{counter, histogram};
use std::time::Duration;

use nil_core::{BackendKind, TransportOp};

pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_ERROR: &str = "error";

pub const MODE_FAST: &str = "fast";
pub const MODE_METERED: &str = "metered";
pub const MODE_CACHE: &str = "cache";

pub fn record_transport_attempt(op: TransportOp, backend: BackendKind, outcome: &str, duration: Duration) {
    counter!(
        "nil_transport_attempts_total",
        "op" => op.as_str(),
        "backend" => backend.as_str(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "nil_transport_attempt_duration_seconds",
        "op" => op.as_str(),
        "backend" => backend.as_str()
    )
    .record(duration.as_secs_f64());
}

pub fn record_retrieval(mode: &str, outcome: &str, bytes: u64, duration: Duration) {
    counter!("nil_retrievals_total", "mode" => mode.to_string(), "outcome" => outcome.to_string()).increment(1);
    counter!("nil_retrieval_bytes_total", "mode" => mode.to_string()).increment(bytes);
    histogram!("nil_retrieval_duration_seconds", "mode" => mode.to_string()).record(duration.as_secs_f64());
}
