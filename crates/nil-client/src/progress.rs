//! Retrieval phases and the progress side channel

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchPhase {
    #[default]
    Idle,
    Planning,
    OpeningSessionTx,
    Fetching,
    ConfirmingSessionTx,
    SubmittingProofRequest,
    Done,
    Error,
}

impl FetchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchPhase::Idle => "idle",
            FetchPhase::Planning => "planning",
            FetchPhase::OpeningSessionTx => "opening_session_tx",
            FetchPhase::Fetching => "fetching",
            FetchPhase::ConfirmingSessionTx => "confirming_session_tx",
            FetchPhase::SubmittingProofRequest => "submitting_proof_request",
            FetchPhase::Done => "done",
            FetchPhase::Error => "error",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, FetchPhase::Done | FetchPhase::Error)
    }
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metering outcome; the fast path never leaves `NotApplicable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    #[default]
    NotApplicable,
    Pending,
    Submitted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FetchProgress {
    pub phase: FetchPhase,
    pub chunks_fetched: u64,
    pub chunk_count: u64,
    pub bytes_fetched: u64,
    pub bytes_total: u64,
    pub receipts_submitted: u64,
    pub receipts_total: u64,
    pub receipt_status: ReceiptStatus,
    /// Prompt or error text for an interactive caller
    pub message: Option<String>,
}

/// Write side, owned by the orchestrator for one retrieval
#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<FetchProgress>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FetchProgress::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchProgress> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> FetchProgress {
        self.tx.borrow().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut FetchProgress)) {
        self.tx.send_modify(f);
    }

    pub fn reset(&self) {
        self.tx.send_replace(FetchProgress::default());
    }

    pub fn phase(&self, phase: FetchPhase) {
        tracing::debug!(phase = %phase, "Retrieval phase");
        self.update(|p| {
            p.phase = phase;
            p.message = None;
        });
    }

    pub fn message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|p| p.message = Some(message));
    }

    pub fn chunk_done(&self, bytes: u64) {
        self.update(|p| {
            p.chunks_fetched += 1;
            p.bytes_fetched += bytes;
        });
    }

    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|p| {
            p.phase = FetchPhase::Error;
            if p.receipt_status == ReceiptStatus::Pending {
                p.receipt_status = ReceiptStatus::Failed;
            }
            p.message = Some(message);
        });
    }
}
