//! Provider session grouping
//!
//! Each planned chunk is assigned to one provider. One on-chain session is
//! opened per provider, covering the smallest contiguous blob window that
//! contains all of that provider's chunks, even when the chunks themselves
//! are discontiguous.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::planner::FileRangeChunk;

/// A chunk together with its provider assignment and blob coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChunk {
    /// Position in the planner output, used for reassembly
    pub index: usize,
    pub chunk: FileRangeChunk,
    pub provider: String,
    pub start_mdu_index: u64,
    pub start_blob_index: u32,
    pub blob_count: u64,
}

impl PlannedChunk {
    pub fn global_blob_start(&self, blobs_per_mdu: u64) -> u64 {
        global_blob_index(self.start_mdu_index, self.start_blob_index, blobs_per_mdu)
    }

    pub fn global_blob_end(&self, blobs_per_mdu: u64) -> u64 {
        self.global_blob_start(blobs_per_mdu) + self.blob_count.max(1) - 1
    }
}

/// All chunks served by one provider, merged into a single blob window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSessionGroup {
    pub provider: String,
    pub chunks: Vec<PlannedChunk>,
    pub global_blob_start: u64,
    /// Inclusive
    pub global_blob_end: u64,
}

impl ProviderSessionGroup {
    pub fn start_mdu_index(&self, blobs_per_mdu: u64) -> u64 {
        self.global_blob_start / blobs_per_mdu
    }

    pub fn start_blob_index(&self, blobs_per_mdu: u64) -> u32 {
        (self.global_blob_start % blobs_per_mdu) as u32
    }

    pub fn blob_count(&self) -> u64 {
        self.global_blob_end - self.global_blob_start + 1
    }

    pub fn byte_count(&self) -> u64 {
        self.chunks.iter().map(|c| c.chunk.range_len).sum()
    }
}

/// `mdu_index * blobs_per_mdu + blob_index`
pub fn global_blob_index(mdu_index: u64, blob_index: u32, blobs_per_mdu: u64) -> u64 {
    mdu_index * blobs_per_mdu + blob_index as u64
}

/// Group planned chunks by provider, in order of first appearance.
pub fn group_by_provider(chunks: &[PlannedChunk], blobs_per_mdu: u64) -> Vec<ProviderSessionGroup> {
    let mut groups: Vec<ProviderSessionGroup> = Vec::new();
    let mut by_provider: HashMap<&str, usize> = HashMap::new();

    for planned in chunks {
        let start = planned.global_blob_start(blobs_per_mdu);
        let end = planned.global_blob_end(blobs_per_mdu);

        match by_provider.get(planned.provider.as_str()) {
            Some(&idx) => {
                let group = &mut groups[idx];
                group.global_blob_start = group.global_blob_start.min(start);
                group.global_blob_end = group.global_blob_end.max(end);
                group.chunks.push(planned.clone());
            }
            None => {
                by_provider.insert(planned.provider.as_str(), groups.len());
                groups.push(ProviderSessionGroup {
                    provider: planned.provider.clone(),
                    chunks: vec![planned.clone()],
                    global_blob_start: start,
                    global_blob_end: end,
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(index: usize, provider: &str, mdu: u64, blob: u32) -> PlannedChunk {
        PlannedChunk {
            index,
            chunk: FileRangeChunk {
                range_start: index as u64 * 100,
                range_len: 100,
            },
            provider: provider.to_string(),
            start_mdu_index: mdu,
            start_blob_index: blob,
            blob_count: 1,
        }
    }

    #[test]
    fn test_global_blob_index() {
        assert_eq!(global_blob_index(0, 5, 64), 5);
        assert_eq!(global_blob_index(2, 3, 64), 131);
    }

    #[test]
    fn test_group_merges_discontiguous_chunks() {
        let chunks = vec![
            planned(0, "sp-a", 1, 10),
            planned(1, "sp-b", 1, 11),
            planned(2, "sp-a", 2, 0),
        ];
        let groups = group_by_provider(&chunks, 64);
        assert_eq!(groups.len(), 2);

        let a = &groups[0];
        assert_eq!(a.provider, "sp-a");
        assert_eq!(a.chunks.len(), 2);
        assert_eq!(a.global_blob_start, 74);
        assert_eq!(a.global_blob_end, 128);
        assert_eq!(a.start_mdu_index(64), 1);
        assert_eq!(a.start_blob_index(64), 10);
        assert_eq!(a.blob_count(), 55);
        assert_eq!(a.byte_count(), 200);

        let b = &groups[1];
        assert_eq!(b.provider, "sp-b");
        assert_eq!(b.global_blob_start, 75);
        assert_eq!(b.global_blob_end, 75);
    }

    #[test]
    fn test_group_keeps_first_appearance_order() {
        let chunks = vec![planned(0, "z", 0, 0), planned(1, "a", 0, 1), planned(2, "z", 0, 2)];
        let providers: Vec<_> = group_by_provider(&chunks, 64)
            .into_iter()
            .map(|g| g.provider)
            .collect();
        assert_eq!(providers, vec!["z", "a"]);
    }

    #[test]
    fn test_multi_blob_chunk_extends_window() {
        let mut chunk = planned(0, "sp", 0, 62);
        chunk.blob_count = 3;
        let groups = group_by_provider(&[chunk], 64);
        assert_eq!(groups[0].global_blob_end, 64);
        assert_eq!(groups[0].blob_count(), 3);
    }
}
