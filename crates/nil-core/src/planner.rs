//! Range planner: cuts a file byte range into blob-aligned chunks
//!
//! Raw payload is packed 31 bytes per 32-byte scalar, with one leading byte
//! of offset, so the encoded position of a raw byte runs ahead of the raw
//! offset. A chunk is only independently provable if its first and last raw
//! byte land in the same encoded blob, which is what [`plan_chunks`] enforces.

use serde::{Deserialize, Serialize};

use crate::constants::{SCALAR_BYTES, SCALAR_PAYLOAD_BYTES};
use crate::error::PlanError;

/// Contiguous sub-range of a file that lies within one MDU and one blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRangeChunk {
    /// Offset relative to the start of the file
    pub range_start: u64,
    /// Length in bytes, always > 0
    pub range_len: u64,
}

impl FileRangeChunk {
    /// Inclusive last byte, as used in `Range: bytes=start-end`
    pub fn range_end_inclusive(&self) -> u64 {
        self.range_start + self.range_len - 1
    }
}

/// Inputs for [`plan_chunks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanRequest {
    /// Offset of the file inside the slab's raw user data
    pub file_start_offset: u64,
    pub file_size: u64,
    pub range_start: u64,
    pub range_len: u64,
    pub mdu_size: u64,
    pub blob_size: u64,
}

/// Maximum raw bytes one MDU can carry
pub fn raw_capacity_per_mdu(mdu_size: u64) -> u64 {
    (mdu_size / SCALAR_BYTES) * SCALAR_PAYLOAD_BYTES
}

/// Encoded position of a raw offset inside its MDU
pub fn encoded_position(raw_offset_in_mdu: u64) -> u64 {
    raw_offset_in_mdu + raw_offset_in_mdu / SCALAR_PAYLOAD_BYTES + 1
}

/// Blob holding a raw offset. Monotonically non-decreasing in the offset.
pub fn blob_index_for_raw_offset(raw_offset_in_mdu: u64, blob_size: u64) -> u64 {
    encoded_position(raw_offset_in_mdu) / blob_size
}

/// First raw offset after `raw_offset_in_mdu` whose blob index differs,
/// capped at `raw_capacity`.
fn next_blob_boundary(raw_offset_in_mdu: u64, raw_capacity: u64, blob_size: u64) -> u64 {
    if raw_offset_in_mdu >= raw_capacity {
        return raw_capacity;
    }
    let blob = blob_index_for_raw_offset(raw_offset_in_mdu, blob_size);

    let mut lo = raw_offset_in_mdu;
    let mut hi = raw_capacity;
    while lo + 1 < hi {
        let mid = lo + (hi - lo) / 2;
        if blob_index_for_raw_offset(mid, blob_size) == blob {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    if blob_index_for_raw_offset(hi, blob_size) == blob {
        return raw_capacity;
    }
    hi
}

/// Plan the blob-aligned chunks covering `[range_start, range_start + range_len)`.
///
/// The requested length is clamped to EOF. Every emitted chunk is > 0 bytes,
/// at most one blob long, inside a single MDU and a single blob, and the
/// chunks are contiguous and ordered.
pub fn plan_chunks(req: &ChunkPlanRequest) -> Result<Vec<FileRangeChunk>, PlanError> {
    if req.file_size == 0 {
        return Err(PlanError::ZeroFileSize);
    }
    if req.range_len == 0 {
        return Err(PlanError::ZeroRangeLength);
    }
    if req.range_start >= req.file_size {
        return Err(PlanError::RangeStartBeyondEof {
            range_start: req.range_start,
            file_size: req.file_size,
        });
    }
    if req.blob_size == 0 {
        return Err(PlanError::InvalidBlobSize(req.blob_size));
    }
    let raw_capacity = raw_capacity_per_mdu(req.mdu_size);
    if raw_capacity == 0 {
        return Err(PlanError::InvalidMduSize(req.mdu_size));
    }

    let wanted = req.range_len.min(req.file_size - req.range_start);
    let mut remaining = wanted;
    let mut cursor = req.range_start;
    let mut chunks = Vec::new();

    while remaining > 0 {
        let abs = req
            .file_start_offset
            .checked_add(cursor)
            .ok_or(PlanError::OffsetOverflow(cursor))?;
        let offset_in_mdu = abs % raw_capacity;
        let mdu_remaining = raw_capacity - offset_in_mdu;
        let blob_remaining = next_blob_boundary(offset_in_mdu, raw_capacity, req.blob_size) - offset_in_mdu;

        let len = remaining.min(mdu_remaining).min(blob_remaining).min(req.blob_size);
        if len == 0 {
            return Err(PlanError::NonPositiveChunk(cursor));
        }

        chunks.push(FileRangeChunk {
            range_start: cursor,
            range_len: len,
        });
        cursor += len;
        remaining -= len;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BLOB_SIZE_BYTES, MDU_SIZE_BYTES};

    fn request(file_start_offset: u64, file_size: u64, range_start: u64, range_len: u64) -> ChunkPlanRequest {
        ChunkPlanRequest {
            file_start_offset,
            file_size,
            range_start,
            range_len,
            mdu_size: MDU_SIZE_BYTES,
            blob_size: BLOB_SIZE_BYTES,
        }
    }

    fn assert_chunk_invariants(req: &ChunkPlanRequest, chunks: &[FileRangeChunk]) {
        let raw_capacity = raw_capacity_per_mdu(req.mdu_size);
        let expected = req.range_len.min(req.file_size - req.range_start);
        let total: u64 = chunks.iter().map(|c| c.range_len).sum();
        assert_eq!(total, expected);

        let mut cursor = req.range_start;
        for chunk in chunks {
            assert!(chunk.range_len > 0);
            assert!(chunk.range_len <= req.blob_size);
            assert_eq!(chunk.range_start, cursor, "chunks must be contiguous");
            cursor += chunk.range_len;

            let first = req.file_start_offset + chunk.range_start;
            let last = first + chunk.range_len - 1;
            assert_eq!(first / raw_capacity, last / raw_capacity, "chunk crosses an MDU");
            assert_eq!(
                blob_index_for_raw_offset(first % raw_capacity, req.blob_size),
                blob_index_for_raw_offset(last % raw_capacity, req.blob_size),
                "chunk crosses a blob"
            );
        }
    }

    #[test]
    fn test_raw_capacity() {
        assert_eq!(raw_capacity_per_mdu(MDU_SIZE_BYTES), 262_144 * 31);
        assert_eq!(raw_capacity_per_mdu(31), 0);
        assert_eq!(raw_capacity_per_mdu(64), 62);
    }

    #[test]
    fn test_encoded_position() {
        assert_eq!(encoded_position(0), 1);
        assert_eq!(encoded_position(30), 31);
        assert_eq!(encoded_position(31), 33);
        assert_eq!(encoded_position(62), 65);
    }

    #[test]
    fn test_blob_index_is_monotonic() {
        let mut prev = 0;
        for offset in (0..raw_capacity_per_mdu(MDU_SIZE_BYTES)).step_by(4093) {
            let blob = blob_index_for_raw_offset(offset, BLOB_SIZE_BYTES);
            assert!(blob >= prev);
            prev = blob;
        }
        assert_eq!(prev, 63);
    }

    #[test]
    fn test_next_blob_boundary_is_exact() {
        let cap = raw_capacity_per_mdu(MDU_SIZE_BYTES);
        let boundary = next_blob_boundary(0, cap, BLOB_SIZE_BYTES);
        assert_eq!(blob_index_for_raw_offset(boundary - 1, BLOB_SIZE_BYTES), 0);
        assert_eq!(blob_index_for_raw_offset(boundary, BLOB_SIZE_BYTES), 1);
    }

    #[test]
    fn test_plan_multi_chunk_scenario() {
        let req = request(12_345, 1_048_576, 0, 400_000);
        let chunks = plan_chunks(&req).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.range_len <= 131_072));
        assert_eq!(chunks.iter().map(|c| c.range_len).sum::<u64>(), 400_000);
        assert_chunk_invariants(&req, &chunks);
    }

    #[test]
    fn test_plan_clamps_to_eof() {
        let req = request(0, 1000, 900, 5000);
        let chunks = plan_chunks(&req).unwrap();
        assert_eq!(chunks, vec![FileRangeChunk { range_start: 900, range_len: 100 }]);
    }

    #[test]
    fn test_plan_crosses_mdu_boundary() {
        let cap = raw_capacity_per_mdu(MDU_SIZE_BYTES);
        let req = request(cap - 10, 100, 0, 100);
        let chunks = plan_chunks(&req).unwrap();
        assert_eq!(chunks[0].range_len, 10);
        assert_eq!(chunks[1].range_start, 10);
        assert_chunk_invariants(&req, &chunks);
    }

    #[test]
    fn test_plan_invariants_over_many_inputs() {
        let offsets = [0u64, 1, 30, 31, 126_975, 126_976, 1_000_000, 8_126_000];
        let starts = [0u64, 5, 131_071, 500_000];
        let lens = [1u64, 31, 131_072, 300_001, 2_000_000];
        for &off in &offsets {
            for &start in &starts {
                for &len in &lens {
                    let req = request(off, 3_000_000, start, len);
                    let chunks = plan_chunks(&req).unwrap();
                    assert_chunk_invariants(&req, &chunks);
                }
            }
        }
    }

    #[test]
    fn test_plan_small_geometry() {
        let req = ChunkPlanRequest {
            file_start_offset: 7,
            file_size: 500,
            range_start: 3,
            range_len: 400,
            mdu_size: 256,
            blob_size: 64,
        };
        let chunks = plan_chunks(&req).unwrap();
        assert_chunk_invariants(&req, &chunks);
    }

    #[test]
    fn test_plan_rejects_bad_inputs() {
        assert_eq!(plan_chunks(&request(0, 0, 0, 1)), Err(PlanError::ZeroFileSize));
        assert_eq!(plan_chunks(&request(0, 10, 0, 0)), Err(PlanError::ZeroRangeLength));
        assert_eq!(
            plan_chunks(&request(0, 10, 10, 1)),
            Err(PlanError::RangeStartBeyondEof { range_start: 10, file_size: 10 })
        );

        let mut bad_mdu = request(0, 10, 0, 1);
        bad_mdu.mdu_size = 16;
        assert_eq!(plan_chunks(&bad_mdu), Err(PlanError::InvalidMduSize(16)));

        let mut bad_blob = request(0, 10, 0, 1);
        bad_blob.blob_size = 0;
        assert_eq!(plan_chunks(&bad_blob), Err(PlanError::InvalidBlobSize(0)));
    }

    #[test]
    fn test_range_end_inclusive() {
        let chunk = FileRangeChunk { range_start: 100, range_len: 50 };
        assert_eq!(chunk.range_end_inclusive(), 149);
    }
}
