//! # Fork Choice
//!
//! Decides what to do with a header that competes with the local tip. The
//! rules are checked in order and the first match wins:
//!
//! 1. `IdenticalBlock`: same id as the tip.
//! 2. `DoubleForging`: same generator and height as the tip, different id.
//! 3. `ValidBlock`: child of the tip.
//! 4. `TieBreak`: sibling of the tip that is preferred over it.
//! 5. `DifferentChain`: higher `max_height_prevoted` than the tip.
//! 6. `Discard`: anything else.
//!
//! "Preferred" compares `max_height_prevoted`, then height, then time-slot
//! (earlier wins). The resolver holds no state, so identical inputs always
//! produce the identical outcome.

use crate::config::{ForkChoiceConfig, SlotBasis};
use serde::{Deserialize, Serialize};
use shared_types::BlockHeader;
use std::cmp::Ordering;

/// Fork choice outcome and the action it implies for the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForkStatus {
    /// Already have it; ignore.
    IdenticalBlock,
    /// Generator forged two blocks at one height; report.
    DoubleForging,
    /// Extends the tip; apply.
    ValidBlock,
    /// Revert the tip, then apply the received block. If that fails the
    /// caller restores the original tip.
    TieBreak,
    /// Peer is on a chain with more prevotes; start long-range sync.
    DifferentChain,
    /// Ignore.
    Discard,
}

impl ForkStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::IdenticalBlock => "identical_block",
            Self::DoubleForging => "double_forging",
            Self::ValidBlock => "valid_block",
            Self::TieBreak => "tie_break",
            Self::DifferentChain => "different_chain",
            Self::Discard => "discard",
        }
    }
}

/// A header together with the local time it was received.
#[derive(Clone, Copy, Debug)]
pub struct ObservedHeader<'a> {
    pub header: &'a BlockHeader,
    /// Local arrival time in seconds
    pub received_at: u64,
}

impl<'a> ObservedHeader<'a> {
    pub fn new(header: &'a BlockHeader, received_at: u64) -> Self {
        Self {
            header,
            received_at,
        }
    }
}

/// Stateless fork choice.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForkChoiceResolver {
    config: ForkChoiceConfig,
}

impl ForkChoiceResolver {
    pub fn new(config: ForkChoiceConfig) -> Self {
        Self { config }
    }

    /// Classify `received` against the current `tip`.
    pub fn resolve(&self, received: ObservedHeader<'_>, tip: ObservedHeader<'_>) -> ForkStatus {
        let (r, t) = (received.header, tip.header);

        if r.id == t.id {
            return ForkStatus::IdenticalBlock;
        }
        if r.generator_address == t.generator_address && r.height == t.height {
            return ForkStatus::DoubleForging;
        }
        if r.is_child_of(t) {
            return ForkStatus::ValidBlock;
        }
        if r.previous_block_id == t.previous_block_id
            && self.preference(received, tip) == Ordering::Greater
        {
            return ForkStatus::TieBreak;
        }
        if r.max_height_prevoted > t.max_height_prevoted {
            return ForkStatus::DifferentChain;
        }
        ForkStatus::Discard
    }

    /// `Greater` if `a` is preferred over `b`.
    pub fn preference(&self, a: ObservedHeader<'_>, b: ObservedHeader<'_>) -> Ordering {
        a.header
            .max_height_prevoted
            .cmp(&b.header.max_height_prevoted)
            .then(a.header.height.cmp(&b.header.height))
            // An earlier slot is better
            .then(self.slot(b).cmp(&self.slot(a)))
    }

    /// Time-slot a header falls into under the configured basis.
    pub fn slot(&self, observed: ObservedHeader<'_>) -> u64 {
        let time = match self.config.slot_basis {
            SlotBasis::ArrivalTime => observed.received_at,
            SlotBasis::ForgingTimestamp => observed.header.timestamp,
        };
        self.config.slot_of(time)
    }
}
