//! Multi-backend router with ordered fallback and decision tracing

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use nil_core::{BackendKind, RoutePreference, TransportOp};

use super::error::TransportError;
use crate::metrics;

type ExecuteFn<'a, T> = Box<dyn Fn() -> BoxFuture<'a, Result<T, TransportError>> + Send + Sync + 'a>;

/// One way of performing an operation against one backend
///
/// `execute` is called once per attempt. Dropping the returned future
/// cancels the attempt.
pub struct TransportCandidate<'a, T> {
    pub backend: BackendKind,
    pub endpoint: String,
    execute: ExecuteFn<'a, T>,
}

impl<'a, T> TransportCandidate<'a, T> {
    pub fn new<F, Fut>(backend: BackendKind, endpoint: impl Into<String>, execute: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Result<T, TransportError>> + Send + 'a,
    {
        Self {
            backend,
            endpoint: endpoint.into(),
            execute: Box::new(move || Box::pin(execute())),
        }
    }
}

impl<T> std::fmt::Debug for TransportCandidate<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCandidate")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportAttempt {
    pub backend: BackendKind,
    pub endpoint: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<super::ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenBackend {
    pub backend: BackendKind,
    pub endpoint: String,
}

/// Audit trail of one routed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub op: TransportOp,
    pub preference: RoutePreference,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub attempts: Vec<TransportAttempt>,
    pub chosen: Option<ChosenBackend>,
}

#[derive(Debug, Clone)]
pub struct TransportOutcome<T> {
    pub data: T,
    pub backend: BackendKind,
    pub trace: DecisionTrace,
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub preference: RoutePreference,
    /// Per-attempt deadline
    pub timeout: Option<Duration>,
    pub max_attempts_per_backend: u32,
    /// Defaults to candidates × max_attempts_per_backend
    pub max_total_attempts: Option<u32>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            preference: RoutePreference::Auto,
            timeout: None,
            max_attempts_per_backend: 1,
            max_total_attempts: None,
        }
    }
}

impl RouterOptions {
    pub fn new(preference: RoutePreference) -> Self {
        Self {
            preference,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts_per_backend(mut self, attempts: u32) -> Self {
        self.max_attempts_per_backend = attempts;
        self
    }

    pub fn with_max_total_attempts(mut self, attempts: u32) -> Self {
        self.max_total_attempts = Some(attempts);
        self
    }
}

/// Routed operation failed; always carries the full trace
#[derive(Error, Debug, Clone)]
pub enum RouterError {
    #[error("Terminal {op} failure: {last_error}")]
    Terminal {
        op: TransportOp,
        trace: Box<DecisionTrace>,
        last_error: TransportError,
    },

    #[error("All {op} attempts failed ({} attempts)", .trace.attempts.len())]
    Exhausted {
        op: TransportOp,
        trace: Box<DecisionTrace>,
        last_error: Option<TransportError>,
    },
}

impl RouterError {
    pub fn trace(&self) -> &DecisionTrace {
        match self {
            RouterError::Terminal { trace, .. } | RouterError::Exhausted { trace, .. } => trace,
        }
    }

    pub fn last_error(&self) -> Option<&TransportError> {
        match self {
            RouterError::Terminal { last_error, .. } => Some(last_error),
            RouterError::Exhausted { last_error, .. } => last_error.as_ref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RouterError::Terminal { .. })
    }
}

/// Move candidates of the preferred backend kind to the front
///
/// The sort is stable, so order within a kind is unchanged and `Auto`
/// keeps the caller's order.
pub fn order_candidates<T>(
    preference: RoutePreference,
    mut candidates: Vec<TransportCandidate<'_, T>>,
) -> Vec<TransportCandidate<'_, T>> {
    if let Some(preferred) = preference.preferred_backend() {
        candidates.sort_by_key(|c| c.backend != preferred);
    }
    candidates
}

/// Run candidates in preference order until one succeeds
///
/// Terminal errors abort immediately. Retryable errors are retried on the
/// same backend up to `max_attempts_per_backend`; anything else moves on to
/// the next candidate.
pub async fn execute_with_fallback<T>(
    op: TransportOp,
    candidates: Vec<TransportCandidate<'_, T>>,
    opts: &RouterOptions,
) -> Result<TransportOutcome<T>, RouterError> {
    let started_at_ms = unix_ms();
    let ordered = order_candidates(opts.preference, candidates);
    let max_per_backend = opts.max_attempts_per_backend.max(1);
    let max_total = opts
        .max_total_attempts
        .unwrap_or(ordered.len() as u32 * max_per_backend);

    let mut attempts = Vec::new();
    let mut last_error = None;
    let mut total = 0u32;

    let trace = |attempts: Vec<TransportAttempt>, chosen: Option<ChosenBackend>| DecisionTrace {
        op,
        preference: opts.preference,
        started_at_ms,
        finished_at_ms: unix_ms(),
        attempts,
        chosen,
    };

    for candidate in &ordered {
        let mut backend_attempts = 0u32;

        while backend_attempts < max_per_backend && total < max_total {
            total += 1;
            backend_attempts += 1;

            let attempt_start = Instant::now();
            let result = match opts.timeout {
                Some(limit) => match tokio::time::timeout(limit, (candidate.execute)()).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::timeout(limit.as_millis() as u64)),
                },
                None => (candidate.execute)().await,
            };
            let elapsed = attempt_start.elapsed();

            match result {
                Ok(data) => {
                    metrics::record_transport_attempt(op, candidate.backend, metrics::OUTCOME_OK, elapsed);
                    debug!(
                        op = %op,
                        backend = %candidate.backend,
                        endpoint = %candidate.endpoint,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Transport attempt succeeded"
                    );
                    attempts.push(TransportAttempt {
                        backend: candidate.backend,
                        endpoint: candidate.endpoint.clone(),
                        ok: true,
                        status: None,
                        error_class: None,
                        error_message: None,
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                    let chosen = ChosenBackend {
                        backend: candidate.backend,
                        endpoint: candidate.endpoint.clone(),
                    };
                    return Ok(TransportOutcome {
                        data,
                        backend: candidate.backend,
                        trace: trace(attempts, Some(chosen)),
                    });
                }
                Err(err) => {
                    metrics::record_transport_attempt(op, candidate.backend, err.class.as_str(), elapsed);
                    warn!(
                        op = %op,
                        backend = %candidate.backend,
                        endpoint = %candidate.endpoint,
                        class = %err.class,
                        attempt = backend_attempts,
                        error = %err.message,
                        "Transport attempt failed"
                    );
                    attempts.push(TransportAttempt {
                        backend: candidate.backend,
                        endpoint: candidate.endpoint.clone(),
                        ok: false,
                        status: err.status,
                        error_class: Some(err.class),
                        error_message: Some(err.message.clone()),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });

                    if err.is_terminal() {
                        return Err(RouterError::Terminal {
                            op,
                            trace: Box::new(trace(attempts, None)),
                            last_error: err,
                        });
                    }

                    let retryable = err.is_retryable();
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }
    }

    Err(RouterError::Exhausted {
        op,
        trace: Box::new(trace(attempts, None)),
        last_error,
    })
}

pub(crate) fn unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
