//! In-memory ordered key-value store.
//!
//! Backed by a `BTreeMap` so scans come back in key order, matching the
//! ordering contract of a production LSM store.

use crate::ports::outbound::{BatchOperation, IterateOptions, KVStoreError, KeyValueStore};
use std::collections::BTreeMap;

/// In-memory key-value store for testing and embedding.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.data.remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        // Nothing here can fail part-way, so applying in order is atomic.
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iterate(&self, options: &IterateOptions) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        if options.gte > options.lte {
            return Ok(Vec::new());
        }
        let range = self
            .data
            .range(options.gte.clone()..=options.lte.clone())
            .map(|(k, v)| (k.clone(), v.clone()));
        let limit = options.limit.unwrap_or(usize::MAX);
        let results = if options.reverse {
            range.rev().take(limit).collect()
        } else {
            range.take(limit).collect()
        };
        Ok(results)
    }
}
