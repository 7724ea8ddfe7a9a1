//! Ledger contract for retrieval sessions
//!
//! The orchestrator needs three things from the chain: a read-only
//! computation of the session ids a batch would get, a batched open, and a
//! batched confirm. [`EvmLedger`] provides them over EVM JSON-RPC against the
//! storage precompile.

use alloy_primitives::{Address, Bytes, B256, U64};
use alloy_rpc_client::{ClientBuilder, RpcClient};
use alloy_sol_types::SolCall;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use nil_core::SessionId;

use crate::abi::{
    computeRetrievalSessionsCall, confirmRetrievalSessionsCall, openRetrievalSessionsCall, SessionParams,
};
use crate::error::{ChainError, Result};

/// One session in a batched open request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub deal_id: u64,
    pub provider: String,
    pub manifest_root: Vec<u8>,
    pub start_mdu_index: u64,
    pub start_blob_index: u32,
    pub blob_count: u64,
    pub nonce: u64,
    pub expires_at: u64,
}

impl From<&SessionRequest> for SessionParams {
    fn from(req: &SessionRequest) -> Self {
        SessionParams {
            dealId: req.deal_id,
            provider: req.provider.clone(),
            manifestRoot: Bytes::from(req.manifest_root.clone()),
            startMduIndex: req.start_mdu_index,
            startBlobIndex: req.start_blob_index,
            blobCount: req.blob_count,
            nonce: req.nonce,
            expiresAt: req.expires_at,
        }
    }
}

/// Session id the ledger would assign to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedSession {
    pub provider: String,
    pub session_id: SessionId,
}

/// Result of an included transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// Read/write contract of the retrieval session ledger
pub trait Ledger: Send + Sync {
    /// Current chain height
    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Read-only: ids the ledger will assign, in request order
    fn compute_session_ids(
        &self,
        sessions: &[SessionRequest],
    ) -> impl Future<Output = Result<Vec<ComputedSession>>> + Send;

    /// Open every session in one transaction and wait for inclusion
    fn open_sessions(&self, sessions: &[SessionRequest]) -> impl Future<Output = Result<TxOutcome>> + Send;

    /// Confirm every session in one transaction and wait for inclusion
    fn confirm_sessions(&self, session_ids: &[SessionId]) -> impl Future<Output = Result<TxOutcome>> + Send;

    /// Account calls and transactions are sent from; the ledger hashes
    /// session ids with it as the owner
    fn sender(&self) -> Option<String> {
        None
    }
}

/// Connection settings for [`EvmLedger`]
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    /// Storage precompile address (0x-hex)
    pub precompile_address: String,
    /// Account that sends transactions; must be managed by the RPC node
    pub from: Option<String>,
    pub poll_interval: Duration,
    pub inclusion_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".into(),
            precompile_address: "0x0000000000000000000000000000000000000900".into(),
            from: None,
            poll_interval: Duration::from_secs(1),
            inclusion_timeout: Duration::from_secs(60),
        }
    }
}

impl LedgerConfig {
    pub fn from_retrieval_config(config: &nil_core::RetrievalConfig, from: Option<String>) -> Self {
        Self {
            rpc_url: config.evm_rpc_url.clone(),
            precompile_address: config.precompile_address.clone(),
            from,
            poll_interval: config.tx_poll_interval(),
            inclusion_timeout: config.tx_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<Address>,
    to: Address,
    data: Bytes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptSummary {
    #[serde(default)]
    status: Option<U64>,
    #[serde(default)]
    block_number: Option<U64>,
}

/// Ledger backed by the storage precompile over EVM JSON-RPC
pub struct EvmLedger {
    client: RpcClient,
    precompile: Address,
    from: Option<Address>,
    poll_interval: Duration,
    inclusion_timeout: Duration,
}

impl EvmLedger {
    pub async fn connect(config: LedgerConfig) -> Result<Self> {
        let client = ClientBuilder::default()
            .connect(&config.rpc_url)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let precompile = parse_address(&config.precompile_address)?;
        let from = config.from.as_deref().map(parse_address).transpose()?;

        Ok(Self {
            client,
            precompile,
            from,
            poll_interval: config.poll_interval,
            inclusion_timeout: config.inclusion_timeout,
        })
    }

    async fn rpc_call<Params, Resp>(&self, method: &str, params: Params) -> Result<Resp>
    where
        Params: Serialize + Clone + std::fmt::Debug + Send + Sync + Unpin + 'static,
        Resp: DeserializeOwned + std::fmt::Debug + Send + Sync + Unpin + 'static,
    {
        self.client
            .request(method.to_string(), params)
            .await
            .map_err(|e| ChainError::Rpc(format!("{}: {}", method, e)))
    }

    async fn eth_call(&self, data: Vec<u8>) -> Result<Bytes> {
        let req = CallRequest {
            from: self.from,
            to: self.precompile,
            data: Bytes::from(data),
        };
        self.rpc_call("eth_call", (req, "latest")).await
    }

    async fn send_and_wait(&self, label: &str, data: Vec<u8>) -> Result<TxOutcome> {
        let req = CallRequest {
            from: self.from,
            to: self.precompile,
            data: Bytes::from(data),
        };
        let tx_hash: B256 = self.rpc_call("eth_sendTransaction", (req,)).await?;
        let tx_hex = format!("0x{}", hex::encode(tx_hash.0));
        info!(tx = %tx_hex, label, "Transaction submitted, waiting for inclusion");

        let started = Instant::now();
        loop {
            let receipt: Option<ReceiptSummary> = self.rpc_call("eth_getTransactionReceipt", (tx_hash,)).await?;
            if let Some(receipt) = receipt {
                let ok = receipt.status.map(|s| s.to::<u64>() == 1).unwrap_or(true);
                if !ok {
                    warn!(tx = %tx_hex, label, "Transaction reverted");
                    return Err(ChainError::Reverted { tx_hash: tx_hex });
                }
                let block_number = receipt.block_number.map(|b| b.to::<u64>());
                info!(tx = %tx_hex, label, block = ?block_number, "Transaction included");
                return Ok(TxOutcome {
                    tx_hash: tx_hex,
                    block_number,
                });
            }

            if started.elapsed() >= self.inclusion_timeout {
                return Err(ChainError::InclusionTimeout {
                    tx_hash: tx_hex,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            debug!(tx = %tx_hex, "Receipt not yet available");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl Ledger for EvmLedger {
    fn sender(&self) -> Option<String> {
        self.from.map(|from| from.to_string())
    }

    async fn block_number(&self) -> Result<u64> {
        let block: U64 = self
            .client
            .request_noparams("eth_blockNumber")
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(block.to::<u64>())
    }

    async fn compute_session_ids(&self, sessions: &[SessionRequest]) -> Result<Vec<ComputedSession>> {
        let call = computeRetrievalSessionsCall {
            sessions: sessions.iter().map(SessionParams::from).collect(),
        };
        let raw = self.eth_call(call.abi_encode()).await?;
        let computed =
            computeRetrievalSessionsCall::abi_decode_returns(&raw).map_err(|e| ChainError::Abi(e.to_string()))?;

        if computed.len() != sessions.len() {
            return Err(ChainError::SessionCountMismatch {
                expected: sessions.len(),
                actual: computed.len(),
            });
        }

        Ok(computed
            .into_iter()
            .map(|c| ComputedSession {
                provider: c.provider,
                session_id: c.sessionId.0,
            })
            .collect())
    }

    async fn open_sessions(&self, sessions: &[SessionRequest]) -> Result<TxOutcome> {
        let call = openRetrievalSessionsCall {
            sessions: sessions.iter().map(SessionParams::from).collect(),
        };
        self.send_and_wait("open_sessions", call.abi_encode()).await
    }

    async fn confirm_sessions(&self, session_ids: &[SessionId]) -> Result<TxOutcome> {
        let call = confirmRetrievalSessionsCall {
            sessionIds: session_ids.iter().map(|id| B256::from(*id)).collect(),
        };
        self.send_and_wait("confirm_sessions", call.abi_encode()).await
    }
}

fn parse_address(value: &str) -> Result<Address> {
    value.parse::<Address>().map_err(|e| ChainError::InvalidAddress {
        value: value.to_string(),
        reason: e.to_string(),
    })
}
