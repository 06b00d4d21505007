//! BFT parameters entity
//!
//! Thresholds and the weighted validator set governing a range of heights.
//! A record is immutable once stored; a validator-set change produces a new
//! record keyed by its effective height.

use crate::error::{BftError, BftResult};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use shared_types::{Address, Hash, ValidatorWeight};
use std::collections::HashSet;

/// Thresholds and validator set effective from some height onwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BftParameters {
    prevote_threshold: u64,
    precommit_threshold: u64,
    certificate_threshold: u64,
    /// Sorted by address
    validators: Vec<ValidatorWeight>,
    validators_hash: Hash,
}

impl BftParameters {
    /// Build parameters with explicit thresholds.
    ///
    /// Every threshold must lie in `[ceil(2/3 * total), total]`.
    pub fn new(
        mut validators: Vec<ValidatorWeight>,
        prevote_threshold: u64,
        precommit_threshold: u64,
        certificate_threshold: u64,
    ) -> BftResult<Self> {
        if validators.is_empty() {
            return Err(invalid("validator set is empty"));
        }

        let mut seen = HashSet::with_capacity(validators.len());
        for v in &validators {
            if v.bft_weight == 0 {
                return Err(invalid(format!(
                    "validator {} has zero weight",
                    hex::encode(v.address)
                )));
            }
            if !seen.insert(v.address) {
                return Err(invalid(format!(
                    "duplicate validator {}",
                    hex::encode(v.address)
                )));
            }
        }

        let total = validators
            .iter()
            .try_fold(0u64, |acc, v| acc.checked_add(v.bft_weight))
            .ok_or_else(|| invalid("total weight overflows u64"))?;

        let minimum = minimum_threshold(total);
        for (name, value) in [
            ("prevote", prevote_threshold),
            ("precommit", precommit_threshold),
            ("certificate", certificate_threshold),
        ] {
            if value < minimum || value > total {
                return Err(invalid(format!(
                    "{} threshold {} outside [{}, {}]",
                    name, value, minimum, total
                )));
            }
        }

        validators.sort_by(|a, b| a.address.cmp(&b.address));
        let validators_hash = compute_validators_hash(&validators, certificate_threshold);

        Ok(Self {
            prevote_threshold,
            precommit_threshold,
            certificate_threshold,
            validators,
            validators_hash,
        })
    }

    /// Build parameters with every threshold at `floor(2/3 * total) + 1`.
    pub fn from_validators(validators: Vec<ValidatorWeight>) -> BftResult<Self> {
        let total = validators
            .iter()
            .try_fold(0u64, |acc, v| acc.checked_add(v.bft_weight))
            .ok_or_else(|| invalid("total weight overflows u64"))?;
        let threshold = supermajority(total);
        Self::new(validators, threshold, threshold, threshold)
    }

    pub fn prevote_threshold(&self) -> u64 {
        self.prevote_threshold
    }

    pub fn precommit_threshold(&self) -> u64 {
        self.precommit_threshold
    }

    pub fn certificate_threshold(&self) -> u64 {
        self.certificate_threshold
    }

    /// Validators sorted by address.
    pub fn validators(&self) -> &[ValidatorWeight] {
        &self.validators
    }

    /// Commitment over the validator set and certificate threshold.
    pub fn validators_hash(&self) -> &Hash {
        &self.validators_hash
    }

    /// Position of `address` in the sorted set.
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.validators
            .binary_search_by(|v| v.address.cmp(address))
            .ok()
    }

    pub fn weight_of(&self, address: &Address) -> Option<u64> {
        self.index_of(address).map(|i| self.validators[i].bft_weight)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index_of(address).is_some()
    }

    pub fn total_weight(&self) -> u64 {
        self.validators.iter().map(|v| v.bft_weight).sum()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

/// `floor(2/3 * total) + 1`
///
/// SECURITY: computed without multiplying `total` first so large totals
/// cannot overflow.
pub fn supermajority(total: u64) -> u64 {
    let two_thirds = (total / 3) * 2 + (total % 3) * 2 / 3;
    two_thirds.saturating_add(1).min(total.max(1))
}

/// `ceil(2/3 * total)`
pub fn minimum_threshold(total: u64) -> u64 {
    let q = total / 3;
    let r = total % 3;
    q * 2 + (r * 2).div_ceil(3)
}

fn compute_validators_hash(validators: &[ValidatorWeight], certificate_threshold: u64) -> Hash {
    let mut hasher = Keccak256::new();
    for v in validators {
        hasher.update(v.address);
        hasher.update(v.bft_weight.to_be_bytes());
    }
    hasher.update(certificate_threshold.to_be_bytes());
    hasher.finalize().into()
}

fn invalid(reason: impl Into<String>) -> BftError {
    BftError::InvalidParameters {
        reason: reason.into(),
    }
}
