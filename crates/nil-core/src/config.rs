//! Retrieval client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::RoutePreference;
use crate::constants::{BLOB_SIZE_BYTES, MDU_SIZE_BYTES};
use crate::error::Error;

/// Protocol version constant
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Configuration for the retrieval client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Routing gateway base URL
    pub gateway_base: String,
    /// Provider HTTP base tried after the gateway for list-files, plan and
    /// unmetered fetches
    #[serde(default)]
    pub direct_sp_base: Option<String>,
    /// Chain LCD base URL (provider directory)
    pub lcd_base: String,
    /// EVM JSON-RPC URL used for ledger calls
    pub evm_rpc_url: String,
    /// EVM chain id, also the EIP-712 domain chain id
    pub chain_id: u64,
    /// Storage precompile address (0x-hex)
    pub precompile_address: String,
    /// MDU size in bytes
    #[serde(default = "default_mdu_size")]
    pub mdu_size: u64,
    /// Blob size in bytes
    #[serde(default = "default_blob_size")]
    pub blob_size: u64,
    /// Default backend preference
    #[serde(default)]
    pub preference: RoutePreference,
    /// Per-attempt timeout for plan / list-files / manifest calls
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
    /// Per-attempt timeout for byte-range fetches
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Per-attempt timeout for open-session and session-proof calls
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Retries on the same backend for retryable errors
    #[serde(default = "default_max_attempts_per_backend")]
    pub max_attempts_per_backend: u32,
    /// How long provider endpoint lookups stay cached
    #[serde(default = "default_endpoint_cache_ttl_ms")]
    pub endpoint_cache_ttl_ms: u64,
    /// Session expiry window in blocks, 0 means no expiry
    #[serde(default)]
    pub session_expiry_blocks: u64,
    /// Validity of signed range-read requests, in seconds
    #[serde(default = "default_signed_request_ttl_secs")]
    pub signed_request_ttl_secs: u64,
    /// Poll interval while waiting for transaction inclusion
    #[serde(default = "default_tx_poll_interval_ms")]
    pub tx_poll_interval_ms: u64,
    /// Give up waiting for inclusion after this long
    #[serde(default = "default_tx_timeout_ms")]
    pub tx_timeout_ms: u64,
    /// Protocol version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_mdu_size() -> u64 {
    MDU_SIZE_BYTES
}

fn default_blob_size() -> u64 {
    BLOB_SIZE_BYTES
}

fn default_control_timeout_ms() -> u64 {
    10_000
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts_per_backend() -> u32 {
    1
}

fn default_endpoint_cache_ttl_ms() -> u64 {
    30_000
}

fn default_signed_request_ttl_secs() -> u64 {
    120
}

fn default_tx_poll_interval_ms() -> u64 {
    1_000
}

fn default_tx_timeout_ms() -> u64 {
    60_000
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl RetrievalConfig {
    /// Create a configuration pointing at a gateway; everything else defaults
    pub fn for_gateway(gateway_base: impl Into<String>) -> Self {
        Self {
            gateway_base: gateway_base.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_preference(mut self, preference: RoutePreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_chain(mut self, evm_rpc_url: impl Into<String>, chain_id: u64) -> Self {
        self.evm_rpc_url = evm_rpc_url.into();
        self.chain_id = chain_id;
        self
    }

    pub fn with_direct_sp(mut self, base: impl Into<String>) -> Self {
        self.direct_sp_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_lcd(mut self, lcd_base: impl Into<String>) -> Self {
        self.lcd_base = lcd_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_attempts_per_backend(mut self, attempts: u32) -> Self {
        self.max_attempts_per_backend = attempts;
        self
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Check the geometry is usable by the planner
    pub fn validate(&self) -> crate::Result<()> {
        if self.blob_size == 0 || self.mdu_size < self.blob_size {
            return Err(Error::InvalidConfig(format!(
                "mdu_size {} must be >= blob_size {} > 0",
                self.mdu_size, self.blob_size
            )));
        }
        if self.mdu_size % self.blob_size != 0 {
            return Err(Error::InvalidConfig(format!(
                "mdu_size {} is not a multiple of blob_size {}",
                self.mdu_size, self.blob_size
            )));
        }
        if self.max_attempts_per_backend == 0 {
            return Err(Error::InvalidConfig("max_attempts_per_backend must be >= 1".into()));
        }
        Ok(())
    }

    pub fn blobs_per_mdu(&self) -> u64 {
        self.mdu_size / self.blob_size
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn endpoint_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.endpoint_cache_ttl_ms)
    }

    pub fn tx_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tx_poll_interval_ms)
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            gateway_base: "http://localhost:8080".into(),
            direct_sp_base: None,
            lcd_base: "http://localhost:1317".into(),
            evm_rpc_url: "http://localhost:8545".into(),
            chain_id: 262144,
            precompile_address: "0x0000000000000000000000000000000000000900".into(),
            mdu_size: default_mdu_size(),
            blob_size: default_blob_size(),
            preference: RoutePreference::Auto,
            control_timeout_ms: default_control_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            max_attempts_per_backend: default_max_attempts_per_backend(),
            endpoint_cache_ttl_ms: default_endpoint_cache_ttl_ms(),
            session_expiry_blocks: 0,
            signed_request_ttl_secs: default_signed_request_ttl_secs(),
            tx_poll_interval_ms: default_tx_poll_interval_ms(),
            tx_timeout_ms: default_tx_timeout_ms(),
            version: default_version(),
        }
    }
}
