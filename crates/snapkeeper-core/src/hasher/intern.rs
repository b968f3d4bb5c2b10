use super::HashOutput;
use crate::error::Result;
use crate::storage::Store;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent hex → hash-row-id map. The fast path never touches SQLite;
/// a miss does one insert-or-fetch round trip, so two workers racing on the
/// same digest both end up with the same row id.
pub struct HashInterner {
    store: Arc<Store>,
    algorithm: String,
    map: DashMap<String, i64>,
}

impl HashInterner {
    pub fn new(store: Arc<Store>, algorithm: &str) -> Self {
        Self {
            store,
            algorithm: algorithm.to_string(),
            map: DashMap::new(),
        }
    }

    pub fn get_or_intern(&self, output: &HashOutput, size_bytes: i64) -> Result<i64> {
        if let Some(id) = self.map.get(&output.hex) {
            return Ok(*id);
        }
        let id = self.store.get_or_create_hash(
            &self.algorithm,
            &output.bytes,
            &output.hex,
            size_bytes,
            output.partial_info.as_deref(),
        )?;
        self.map.insert(output.hex.clone(), id);
        Ok(id)
    }

    pub fn interned_count(&self) -> usize {
        self.map.len()
    }
}
