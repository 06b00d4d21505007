//! # BFT Parameters Store
//!
//! Height-indexed parameter records on top of an ordered key-value store.
//!
//! Keys are `PREFIX || height_be`, so lexicographic key order equals height
//! order and "greatest effective height <= h" is a single reverse scan with
//! limit 1.
//!
//! Records are never updated in place. Pruning removes whole records below a
//! boundary but always keeps the record governing the boundary itself.

use crate::domain::parameters::BftParameters;
use crate::error::{BftError, BftResult};
use crate::ports::outbound::{BatchOperation, IterateOptions, KeyValueStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const PARAMS_PREFIX: &[u8] = b"bft:params:";

fn params_key(height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(PARAMS_PREFIX.len() + 4);
    key.extend_from_slice(PARAMS_PREFIX);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn height_from_key(key: &[u8]) -> BftResult<u32> {
    key.strip_prefix(PARAMS_PREFIX)
        .and_then(|rest| <[u8; 4]>::try_from(rest).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| BftError::Codec {
            reason: format!("malformed parameters key {}", hex::encode(key)),
        })
}

fn decode(bytes: &[u8]) -> BftResult<BftParameters> {
    bincode::deserialize(bytes).map_err(|e| BftError::Codec {
        reason: e.to_string(),
    })
}

fn encode(params: &BftParameters) -> BftResult<Vec<u8>> {
    bincode::serialize(params).map_err(|e| BftError::Codec {
        reason: e.to_string(),
    })
}

/// Height-indexed, immutable-once-written BFT parameters.
#[derive(Debug)]
pub struct BftParametersStore<S: KeyValueStore> {
    kv: S,
}

impl<S: KeyValueStore> BftParametersStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    /// Release the underlying store.
    pub fn into_inner(self) -> S {
        self.kv
    }

    /// Parameters with the greatest effective height `<= height`.
    ///
    /// `ParametersNotFound` means pruning or bootstrap went wrong; callers
    /// must not substitute defaults.
    pub fn get_parameters_for_height(&self, height: u32) -> BftResult<BftParameters> {
        self.get_entry_for_height(height).map(|(_, params)| params)
    }

    /// Like [`Self::get_parameters_for_height`] but also returns the
    /// effective height of the record.
    pub fn get_entry_for_height(&self, height: u32) -> BftResult<(u32, BftParameters)> {
        let options = IterateOptions::between(params_key(0), params_key(height))
            .reversed()
            .limit(1);
        let mut entries = self.kv.iterate(&options)?;
        match entries.pop() {
            Some((key, value)) => Ok((height_from_key(&key)?, decode(&value)?)),
            None => Err(BftError::ParametersNotFound { height }),
        }
    }

    /// Store parameters effective from `effective_height`.
    pub fn set_parameters(&mut self, effective_height: u32, params: &BftParameters) -> BftResult<()> {
        let key = params_key(effective_height);
        if self.kv.get(&key)?.is_some() {
            return Err(BftError::DuplicateParameters {
                height: effective_height,
            });
        }
        self.kv.put(&key, &encode(params)?)?;
        info!(
            "[qc-09] Stored BFT parameters at height {} ({} validators, precommit threshold {})",
            effective_height,
            params.len(),
            params.precommit_threshold()
        );
        Ok(())
    }

    /// True if any record governs `height`.
    pub fn exist_parameters(&self, height: u32) -> BftResult<bool> {
        match self.get_entry_for_height(height) {
            Ok(_) => Ok(true),
            Err(BftError::ParametersNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Smallest effective height strictly above `height`, if any.
    pub fn next_parameters_height(&self, height: u32) -> BftResult<Option<u32>> {
        let Some(start) = height.checked_add(1) else {
            return Ok(None);
        };
        let options = IterateOptions::between(params_key(start), params_key(u32::MAX)).limit(1);
        match self.kv.iterate(&options)?.first() {
            Some((key, _)) => Ok(Some(height_from_key(key)?)),
            None => Ok(None),
        }
    }

    /// Remove records below `height`, keeping the record that governs
    /// `height` even if its effective height is lower.
    ///
    /// Returns the number of records removed.
    pub fn delete_parameters_below(&mut self, height: u32) -> BftResult<usize> {
        let governing = match self.get_entry_for_height(height) {
            Ok((effective, _)) => effective,
            // Nothing governs the boundary: deleting would leave no record
            // for heights at or above it that predate the next entry.
            Err(BftError::ParametersNotFound { .. }) => return Ok(0),
            Err(e) => return Err(e),
        };
        if governing == 0 {
            return Ok(0);
        }

        let options = IterateOptions::between(params_key(0), params_key(governing - 1));
        let operations: Vec<BatchOperation> = self
            .kv
            .iterate(&options)?
            .into_iter()
            .map(|(key, _)| BatchOperation::delete(key))
            .collect();
        let removed = operations.len();
        if removed > 0 {
            self.kv.atomic_batch_write(operations)?;
            debug!(
                "[qc-09] Pruned {} BFT parameter records below height {}",
                removed, governing
            );
        }
        Ok(removed)
    }

    /// All stored effective heights, ascending.
    pub fn effective_heights(&self) -> BftResult<Vec<u32>> {
        let options = IterateOptions::between(params_key(0), params_key(u32::MAX));
        self.kv
            .iterate(&options)?
            .iter()
            .map(|(key, _)| height_from_key(key))
            .collect()
    }

    /// Read pass cache over this store.
    pub fn cache(&self) -> ParametersCache<'_, S> {
        ParametersCache::new(self)
    }
}

/// Source of the parameters governing a height.
///
/// The vote ledger reads parameters only through this seam.
pub trait ParametersSource {
    fn parameters_at(&mut self, height: u32) -> BftResult<Arc<BftParameters>>;
}

/// Memoizes lookups during one read pass.
///
/// Borrows the store, so a cache cannot outlive the snapshot it was created
/// from or be carried into the next block-processing invocation.
pub struct ParametersCache<'a, S: KeyValueStore> {
    store: &'a BftParametersStore<S>,
    by_height: HashMap<u32, Arc<BftParameters>>,
}

impl<'a, S: KeyValueStore> ParametersCache<'a, S> {
    pub fn new(store: &'a BftParametersStore<S>) -> Self {
        Self {
            store,
            by_height: HashMap::new(),
        }
    }

    pub fn get(&mut self, height: u32) -> BftResult<Arc<BftParameters>> {
        if let Some(params) = self.by_height.get(&height) {
            return Ok(Arc::clone(params));
        }
        let params = Arc::new(self.store.get_parameters_for_height(height)?);
        self.by_height.insert(height, Arc::clone(&params));
        Ok(params)
    }

    /// Number of memoized heights.
    pub fn len(&self) -> usize {
        self.by_height.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_height.is_empty()
    }
}

impl<S: KeyValueStore> ParametersSource for ParametersCache<'_, S> {
    fn parameters_at(&mut self, height: u32) -> BftResult<Arc<BftParameters>> {
        self.get(height)
    }
}
