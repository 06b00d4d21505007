//! Per-height vote tallies and the finality heights derived from them.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use shared_types::{Address, BlockHeader, BlockId};

/// The three heights the finality layer publishes.
///
/// `max_height_certified <= max_height_precommitted <= max_height_prevoted`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BftHeights {
    pub max_height_prevoted: u32,
    pub max_height_precommitted: u32,
    pub max_height_certified: u32,
}

impl BftHeights {
    /// All three heights at `height`.
    pub fn at(height: u32) -> Self {
        Self {
            max_height_prevoted: height,
            max_height_precommitted: height,
            max_height_certified: height,
        }
    }

    /// Finalized height.
    pub fn finalized(&self) -> u32 {
        self.max_height_precommitted
    }
}

/// Vote tally for one height in the window.
///
/// Voter bitmaps are indexed by the validator's position in the parameters
/// effective at this height, so each validator adds weight at most once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockBftInfo {
    pub height: u32,
    pub block_id: BlockId,
    pub generator_address: Address,
    pub max_height_generated: u32,
    pub max_height_prevoted: u32,
    prevote_weight: u64,
    precommit_weight: u64,
    prevoters: BitVec<u8, Lsb0>,
    precommitters: BitVec<u8, Lsb0>,
}

impl BlockBftInfo {
    /// Empty tally for `header`, sized for `validator_count` voters.
    pub fn from_header(header: &BlockHeader, validator_count: usize) -> Self {
        Self {
            height: header.height,
            block_id: header.id,
            generator_address: header.generator_address,
            max_height_generated: header.max_height_generated,
            max_height_prevoted: header.max_height_prevoted,
            prevote_weight: 0,
            precommit_weight: 0,
            prevoters: bitvec![u8, Lsb0; 0; validator_count],
            precommitters: bitvec![u8, Lsb0; 0; validator_count],
        }
    }

    /// Same header metadata with no votes.
    pub fn cleared(&self) -> Self {
        Self {
            prevote_weight: 0,
            precommit_weight: 0,
            prevoters: bitvec![u8, Lsb0; 0; self.prevoters.len()],
            precommitters: bitvec![u8, Lsb0; 0; self.precommitters.len()],
            ..self.clone()
        }
    }

    pub fn prevote_weight(&self) -> u64 {
        self.prevote_weight
    }

    pub fn precommit_weight(&self) -> u64 {
        self.precommit_weight
    }

    pub fn prevote_count(&self) -> usize {
        self.prevoters.count_ones()
    }

    pub fn precommit_count(&self) -> usize {
        self.precommitters.count_ones()
    }

    pub fn has_prevoted(&self, index: usize) -> bool {
        self.prevoters.get(index).is_some_and(|b| *b)
    }

    pub fn has_precommitted(&self, index: usize) -> bool {
        self.precommitters.get(index).is_some_and(|b| *b)
    }

    /// Add a prevote. Returns false if `index` already prevoted here.
    pub(crate) fn add_prevote(&mut self, index: usize, weight: u64) -> bool {
        if !mark(&mut self.prevoters, index) {
            return false;
        }
        self.prevote_weight = self.prevote_weight.saturating_add(weight);
        true
    }

    /// Add a precommit. Returns false if `index` already precommitted here.
    pub(crate) fn add_precommit(&mut self, index: usize, weight: u64) -> bool {
        if !mark(&mut self.precommitters, index) {
            return false;
        }
        self.precommit_weight = self.precommit_weight.saturating_add(weight);
        true
    }

    /// Take back a prevote added by a reverted header.
    pub(crate) fn remove_prevote(&mut self, index: usize, weight: u64) -> bool {
        if !unmark(&mut self.prevoters, index) {
            return false;
        }
        self.prevote_weight = self.prevote_weight.saturating_sub(weight);
        true
    }

    /// Take back a precommit added by a reverted header.
    pub(crate) fn remove_precommit(&mut self, index: usize, weight: u64) -> bool {
        if !unmark(&mut self.precommitters, index) {
            return false;
        }
        self.precommit_weight = self.precommit_weight.saturating_sub(weight);
        true
    }
}

fn mark(bits: &mut BitVec<u8, Lsb0>, index: usize) -> bool {
    if index >= bits.len() {
        bits.resize(index + 1, false);
    }
    if bits[index] {
        return false;
    }
    bits.set(index, true);
    true
}

fn unmark(bits: &mut BitVec<u8, Lsb0>, index: usize) -> bool {
    if !bits.get(index).is_some_and(|b| *b) {
        return false;
    }
    bits.set(index, false);
    true
}
