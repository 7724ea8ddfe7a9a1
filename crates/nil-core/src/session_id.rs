//! Canonical retrieval session id
//!
//! keccak256 over the big-endian concatenation:
//! ```text
//! owner(20) || deal_id(8) || provider(20) || manifest_root(48) ||
//! start_mdu_index(8) || start_blob_index(4) || blob_count(8) ||
//! nonce(8) || expires_at(8)
//! ```

use tiny_keccak::{Hasher, Keccak};

use crate::constants::MANIFEST_ROOT_BYTES;
use crate::error::Error;
use crate::{Result, SessionId};

/// Fields hashed into a session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdFields {
    pub owner: [u8; 20],
    pub deal_id: u64,
    pub provider: [u8; 20],
    pub manifest_root: [u8; MANIFEST_ROOT_BYTES],
    pub start_mdu_index: u64,
    pub start_blob_index: u32,
    pub blob_count: u64,
    pub nonce: u64,
    pub expires_at: u64,
}

pub fn hash_retrieval_session_id(fields: &SessionIdFields) -> SessionId {
    let mut hasher = Keccak::v256();
    hasher.update(&fields.owner);
    hasher.update(&fields.deal_id.to_be_bytes());
    hasher.update(&fields.provider);
    hasher.update(&fields.manifest_root);
    hasher.update(&fields.start_mdu_index.to_be_bytes());
    hasher.update(&fields.start_blob_index.to_be_bytes());
    hasher.update(&fields.blob_count.to_be_bytes());
    hasher.update(&fields.nonce.to_be_bytes());
    hasher.update(&fields.expires_at.to_be_bytes());

    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// Decode a 20-byte account address given as `0x`-hex or bech32 (`nil1...`)
pub fn parse_account_address(field: &str, value: &str) -> Result<[u8; 20]> {
    let trimmed = value.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        return parse_hex_bytes(field, &trimmed[2..]);
    }
    let (_hrp, data) = bech32::decode(trimmed).map_err(|e| Error::InvalidBech32 {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    let actual = data.len();
    data.try_into().map_err(|_| Error::InvalidLength {
        field: field.to_string(),
        expected: 20,
        actual,
    })
}

/// Decode `0x`-prefixed (or bare) hex into exactly `N` bytes
pub fn parse_hex_bytes<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
    let trimmed = value.trim();
    let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_str).map_err(|e| Error::InvalidHex {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| Error::InvalidLength {
        field: field.to_string(),
        expected: N,
        actual,
    })
}
