//! Local byte cache keyed by (deal, file path)

use std::collections::HashMap;
use std::sync::RwLock;

/// Whole-file byte store
///
/// Implementations must be cheap to query; the orchestrator checks the
/// cache before any network I/O.
pub trait ByteCache: Send + Sync {
    fn get(&self, deal_id: u64, file_path: &str) -> Option<Vec<u8>>;

    fn put(&self, deal_id: u64, file_path: &str, bytes: Vec<u8>);

    /// Bytes `[range_start, range_start + range_len)`, clamped to the end of
    /// the cached file. `None` when nothing is cached, the range is empty or
    /// it starts at or past the end.
    fn get_range(&self, deal_id: u64, file_path: &str, range_start: u64, range_len: u64) -> Option<Vec<u8>> {
        if range_len == 0 {
            return None;
        }
        let bytes = self.get(deal_id, file_path)?;
        let start = usize::try_from(range_start).ok()?;
        if start >= bytes.len() {
            return None;
        }
        let len = usize::try_from(range_len).unwrap_or(usize::MAX);
        let end = start.saturating_add(len).min(bytes.len());
        Some(bytes[start..end].to_vec())
    }
}

#[derive(Debug, Default)]
pub struct MemoryByteCache {
    entries: RwLock<HashMap<(u64, String), Vec<u8>>>,
}

impl MemoryByteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteCache for MemoryByteCache {
    fn get(&self, deal_id: u64, file_path: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().ok()?;
        entries.get(&(deal_id, file_path.to_string())).cloned()
    }

    fn put(&self, deal_id: u64, file_path: &str, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((deal_id, file_path.to_string()), bytes);
        }
    }
}
