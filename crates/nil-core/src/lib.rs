//! nil-core: Core types and planning logic for NilStore retrievals
//!
//! Data lives in fixed-size containers (MDUs) split into fixed-size blobs.
//! A blob is the atomic unit of proof and billing, so every byte-range read
//! has to be cut into pieces that never straddle a blob boundary:
//!
//! - MDU: 8 MiB of encoded payload, the on-chain indexing unit
//! - Blob: 128 KiB slice of an MDU, 64 blobs per MDU
//! - Encoding: every 32-byte scalar carries 31 bytes of raw payload
//!
//! This crate holds everything that can be computed without touching the
//! network: the range planner, provider session grouping, the canonical
//! session id hash, backend/preference enums and the client configuration.

mod backend;
mod config;
mod error;
mod grouping;
mod planner;
mod session_id;

pub use backend::{BackendKind, RoutePreference, TransportOp};
pub use config::{RetrievalConfig, PROTOCOL_VERSION};
pub use error::{Error, PlanError};
pub use grouping::{global_blob_index, group_by_provider, PlannedChunk, ProviderSessionGroup};
pub use planner::{
    blob_index_for_raw_offset, encoded_position, plan_chunks, raw_capacity_per_mdu, ChunkPlanRequest,
    FileRangeChunk,
};
pub use session_id::{hash_retrieval_session_id, parse_account_address, parse_hex_bytes, SessionIdFields};

pub type Result<T> = std::result::Result<T, Error>;

/// 32-byte on-chain retrieval session identifier
pub type SessionId = [u8; 32];

/// Format a session id the way the gateway expects it in headers
pub fn session_id_hex(id: &SessionId) -> String {
    format!("0x{}", hex::encode(id))
}

/// Constants for the NilFS layout
pub mod constants {
    /// Bytes per encoding scalar
    pub const SCALAR_BYTES: u64 = 32;

    /// Raw payload bytes carried by one scalar
    pub const SCALAR_PAYLOAD_BYTES: u64 = 31;

    /// Default MDU size (8 MiB)
    pub const MDU_SIZE_BYTES: u64 = 8 * 1024 * 1024;

    /// Default blob size (128 KiB)
    pub const BLOB_SIZE_BYTES: u64 = 128 * 1024;

    /// Blobs per MDU with the default sizes
    pub const BLOBS_PER_MDU: u64 = MDU_SIZE_BYTES / BLOB_SIZE_BYTES;

    /// Manifest roots are 48-byte commitments
    pub const MANIFEST_ROOT_BYTES: usize = 48;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blobs_per_mdu() {
        assert_eq!(constants::BLOBS_PER_MDU, 64);
    }

    #[test]
    fn test_session_id_hex() {
        let id = [0xabu8; 32];
        let s = session_id_hex(&id);
        assert!(s.starts_with("0xabab"));
        assert_eq!(s.len(), 66);
    }
}
