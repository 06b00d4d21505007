//! Driven Ports (SPI - Outbound Dependencies)
//!
//! The finality core persists BFT parameters through a generic ordered
//! key-value interface. The storage engine itself belongs to the host.

use thiserror::Error;

/// Key-value store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError { message: String },
    /// Data corruption in the store.
    #[error("KV store corruption: {message}")]
    CorruptionError { message: String },
}

/// Bounds and direction for an ordered scan.
///
/// Bounds are inclusive; keys are compared lexicographically.
#[derive(Debug, Clone, Default)]
pub struct IterateOptions {
    pub gte: Vec<u8>,
    pub lte: Vec<u8>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl IterateOptions {
    pub fn between(gte: impl Into<Vec<u8>>, lte: impl Into<Vec<u8>>) -> Self {
        Self {
            gte: gte.into(),
            lte: lte.into(),
            reverse: false,
            limit: None,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Abstract interface for ordered key-value storage.
///
/// Testing: `InMemoryKVStore` (adapters/memory_store.rs)
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Execute an atomic batch write.
    ///
    /// Either ALL operations in the batch succeed, or NONE are applied.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Ordered scan over `[options.gte, options.lte]`.
    fn iterate(&self, options: &IterateOptions) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}
