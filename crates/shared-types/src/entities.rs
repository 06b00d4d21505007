//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Chain**: `BlockHeader` and the identifiers it carries
//! - **Staking**: `ValidatorWeight`, `ValidatorSetChange`

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// A 32-byte hash.
pub type Hash = [u8; 32];

/// Block identifier (hash of the signed header).
pub type BlockId = Hash;

/// A 20-byte validator address.
pub type Address = [u8; 20];

/// Block header metadata consumed by the finality layer.
///
/// Only the fields that carry BFT meaning are represented; the remaining
/// header content (roots, signatures) stays with the block-processing
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Header identifier.
    pub id: BlockId,
    /// Block height in the chain.
    pub height: u32,
    /// Identifier of the parent block.
    pub previous_block_id: BlockId,
    /// Validator that forged this block.
    pub generator_address: Address,
    /// Unix timestamp (seconds) the block was forged for.
    pub timestamp: u64,
    /// Highest height at which the generator claims to have forged before.
    pub max_height_generated: u32,
    /// Highest prevoted height the generator observed when forging.
    pub max_height_prevoted: u32,
}

impl BlockHeader {
    /// True if `self` directly extends `parent`.
    pub fn is_child_of(&self, parent: &BlockHeader) -> bool {
        self.previous_block_id == parent.id && self.height == parent.height.wrapping_add(1)
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} by {}",
            self.height,
            short_hex(&self.id),
            short_hex(&self.generator_address)
        )
    }
}

/// First four bytes of an identifier, hex encoded. Used in log lines.
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(4)])
}

// =============================================================================
// CLUSTER B: STAKING
// =============================================================================

/// Voting power of one validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorWeight {
    pub address: Address,
    pub bft_weight: u64,
}

impl ValidatorWeight {
    pub fn new(address: Address, bft_weight: u64) -> Self {
        Self {
            address,
            bft_weight,
        }
    }
}

/// Validator-set change announced by the staking module.
///
/// The new set governs every height from `effective_height` onwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSetChange {
    pub effective_height: u32,
    pub validators: Vec<ValidatorWeight>,
}
