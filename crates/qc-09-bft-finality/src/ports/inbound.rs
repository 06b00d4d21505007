//! Driving Ports (API - Inbound)
//!
//! The block-processing pipeline drives the finality layer through
//! [`BftApi`]. Every call is synchronous; side effects such as starting a
//! sync or reporting misbehavior are dispatched by the caller from the
//! returned values.

use crate::domain::{
    BftHeights, BftParameters, BlockBftInfo, ContradictingHeaders, ForkStatus, ObservedHeader,
    ProcessingState,
};
use crate::error::BftResult;
use shared_types::{Address, BlockHeader, ValidatorSetChange};

/// Owned copy of the ledger taken under one read guard.
///
/// Readers that need consistent data across several queries take a
/// snapshot instead of issuing separate calls.
#[derive(Clone, Debug)]
pub struct BftSnapshot {
    pub heights: BftHeights,
    pub tip_height: u32,
    /// Retained tallies, ascending
    pub window: Vec<BlockBftInfo>,
    pub processing_state: ProcessingState,
}

impl BftSnapshot {
    pub fn finalized_height(&self) -> u32 {
        self.heights.max_height_precommitted
    }

    pub fn window_start(&self) -> u32 {
        self.window
            .first()
            .map_or(self.tip_height.saturating_add(1), |i| i.height)
    }

    pub fn get_block_bft_info(&self, height: u32) -> Option<&BlockBftInfo> {
        let offset = height.checked_sub(self.window.first()?.height)?;
        self.window.get(offset as usize)
    }
}

/// Primary BFT finality API
///
/// Mutating calls are serialized; read calls may run concurrently and never
/// observe a half-applied mutation.
pub trait BftApi: Send + Sync {
    /// Tally the next header and return the updated heights.
    fn add_block_header(&self, header: &BlockHeader) -> BftResult<BftHeights>;

    /// Revert every header above `height`.
    fn remove_headers_after(&self, height: u32) -> BftResult<BftHeights>;

    /// Replay the retained headers in `[window_start, to_height]`.
    fn recompute(&self, to_height: u32, window_start: u32) -> BftResult<BftHeights>;

    /// Register the validator set effective from `change.effective_height`.
    fn apply_validator_set_change(&self, change: &ValidatorSetChange) -> BftResult<()>;

    /// Raise the certified height. Returns true if it moved.
    fn update_max_height_certified(&self, height: u32) -> BftResult<bool>;

    fn bft_heights(&self) -> BftHeights;

    fn get_parameters_for_height(&self, height: u32) -> BftResult<BftParameters>;

    fn generator_at_height(&self, height: u32) -> Option<Address>;

    /// Classify a competing header against the local tip.
    fn fork_choice(&self, received: ObservedHeader<'_>, tip: ObservedHeader<'_>) -> ForkStatus;

    /// Evidence if `a` and `b` contradict each other.
    fn detect_contradiction(&self, a: &BlockHeader, b: &BlockHeader)
        -> Option<ContradictingHeaders>;

    /// True if `header` contradicts a retained header by the same generator.
    fn is_header_contradicting_chain(&self, header: &BlockHeader) -> bool;

    fn implies_maximal_prevotes(&self, header: &BlockHeader) -> bool;

    fn snapshot(&self) -> BftSnapshot;

    /// Current halt latch state
    fn processing_state(&self) -> ProcessingState;

    /// Manual intervention to resume after a consistency violation.
    ///
    /// Only operators should call this after investigating the cause.
    fn reset_from_halted(&self) -> BftResult<()>;
}
