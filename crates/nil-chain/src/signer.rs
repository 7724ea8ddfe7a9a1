//! EIP-712 intent signing

use alloy_primitives::Address;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{eip712_domain, Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::abi::RetrievalRequest;
use crate::error::{ChainError, Result};

/// Domain shared by every NilStore intent
pub fn nilstore_domain(chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: "NilStore",
        version: "1",
        chain_id: chain_id,
        verifying_contract: Address::ZERO,
    }
}

/// Authorization for reading `range_len` bytes of `file_path` at `range_start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalRequestIntent {
    pub deal_id: u64,
    pub file_path: String,
    pub range_start: u64,
    pub range_len: u64,
    pub nonce: u64,
    pub expires_at: u64,
}

impl From<&RetrievalRequestIntent> for RetrievalRequest {
    fn from(intent: &RetrievalRequestIntent) -> Self {
        RetrievalRequest {
            deal_id: intent.deal_id,
            file_path: intent.file_path.clone(),
            range_start: intent.range_start,
            range_len: intent.range_len,
            nonce: intent.nonce,
            expires_at: intent.expires_at,
        }
    }
}

/// Produces EIP-712 signatures on behalf of the data owner
///
/// Callers issue one request at a time; a wallet may prompt for each.
pub trait IntentSigner: Send + Sync {
    /// Checksummed signer address
    fn address(&self) -> String;

    /// Sign a range-read intent, returning a 0x-prefixed 65-byte signature
    fn sign_retrieval_request(
        &self,
        intent: &RetrievalRequestIntent,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Signer backed by a private key held in memory
#[derive(Debug, Clone)]
pub struct LocalIntentSigner {
    signer: PrivateKeySigner,
    domain: Eip712Domain,
}

impl LocalIntentSigner {
    pub fn new(signer: PrivateKeySigner, chain_id: u64) -> Self {
        Self {
            signer,
            domain: nilstore_domain(chain_id),
        }
    }

    /// Parse a hex private key (with or without 0x)
    pub fn from_hex(key: &str, chain_id: u64) -> Result<Self> {
        let signer = key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| ChainError::InvalidKey(e.to_string()))?;
        Ok(Self::new(signer, chain_id))
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    fn sign_sync(&self, intent: &RetrievalRequestIntent) -> Result<String> {
        let typed = RetrievalRequest::from(intent);
        let hash = typed.eip712_signing_hash(&self.domain);
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}

impl IntentSigner for LocalIntentSigner {
    fn address(&self) -> String {
        self.signer.address().to_checksum(None)
    }

    async fn sign_retrieval_request(&self, intent: &RetrievalRequestIntent) -> Result<String> {
        self.sign_sync(intent)
    }
}
