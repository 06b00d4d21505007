//! # Equivocation Detection
//!
//! Two headers signed by the same generator contradict each other when no
//! honest generator could have produced both while following the
//! `max_height_generated` / `max_height_prevoted` claims it made.
//!
//! The headers are ordered so the "earlier" one has the lexicographically
//! smaller `(max_height_generated, max_height_prevoted, height)` key. They
//! contradict if any of:
//!
//! | Rule | Condition |
//! |------|-----------|
//! | Stale branch | equal `max_height_prevoted` and `later.height <= earlier.height` |
//! | Unacknowledged block | `earlier.height > later.max_height_generated` |
//! | Prevote regression | `earlier.max_height_prevoted > later.max_height_prevoted` |
//!
//! Pure and symmetric in its arguments.

use crate::domain::vote_info::BlockBftInfo;
use serde::{Deserialize, Serialize};
use shared_types::{Address, BlockHeader, BlockId};

/// The claims a header makes that equivocation checks compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderClaims {
    pub id: BlockId,
    pub generator_address: Address,
    pub height: u32,
    pub max_height_generated: u32,
    pub max_height_prevoted: u32,
}

impl HeaderClaims {
    fn order_key(&self) -> (u32, u32, u32) {
        (self.max_height_generated, self.max_height_prevoted, self.height)
    }
}

impl From<&BlockHeader> for HeaderClaims {
    fn from(h: &BlockHeader) -> Self {
        Self {
            id: h.id,
            generator_address: h.generator_address,
            height: h.height,
            max_height_generated: h.max_height_generated,
            max_height_prevoted: h.max_height_prevoted,
        }
    }
}

impl From<&BlockBftInfo> for HeaderClaims {
    fn from(info: &BlockBftInfo) -> Self {
        Self {
            id: info.block_id,
            generator_address: info.generator_address,
            height: info.height,
            max_height_generated: info.max_height_generated,
            max_height_prevoted: info.max_height_prevoted,
        }
    }
}

/// Which contradiction rule fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContradictionReason {
    /// Same prevote claim while not moving above the earlier height
    StaleBranch,
    /// The later header does not acknowledge the earlier block
    UnacknowledgedBlock,
    /// The later header claims a lower prevoted height
    PrevoteRegression,
}

impl ContradictionReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::StaleBranch => "stale_branch",
            Self::UnacknowledgedBlock => "unacknowledged_block",
            Self::PrevoteRegression => "prevote_regression",
        }
    }
}

/// Evidence handed to the misbehavior-reporting collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContradictingHeaders {
    /// Header with the smaller ordering key
    pub earlier: BlockHeader,
    pub later: BlockHeader,
    pub reason: ContradictionReason,
}

impl ContradictingHeaders {
    pub fn generator_address(&self) -> Address {
        self.earlier.generator_address
    }
}

/// True if `a` and `b` could not both have been produced honestly.
///
/// Headers with the same id or different generators never contradict.
pub fn are_headers_contradicting(a: &BlockHeader, b: &BlockHeader) -> bool {
    contradiction_reason(&a.into(), &b.into()).is_some()
}

/// Like [`are_headers_contradicting`] but returns the ordered pair and the
/// rule that fired.
pub fn detect_contradiction(a: &BlockHeader, b: &BlockHeader) -> Option<ContradictingHeaders> {
    let claims_a = HeaderClaims::from(a);
    let claims_b = HeaderClaims::from(b);
    let reason = contradiction_reason(&claims_a, &claims_b)?;
    let (earlier, later) = if claims_b.order_key() < claims_a.order_key() {
        (b.clone(), a.clone())
    } else {
        (a.clone(), b.clone())
    };
    Some(ContradictingHeaders {
        earlier,
        later,
        reason,
    })
}

/// Core check over header claims.
pub fn contradiction_reason(a: &HeaderClaims, b: &HeaderClaims) -> Option<ContradictionReason> {
    if a.id == b.id || a.generator_address != b.generator_address {
        return None;
    }

    let (earlier, later) = if b.order_key() < a.order_key() {
        (b, a)
    } else {
        (a, b)
    };

    if earlier.max_height_prevoted == later.max_height_prevoted && later.height <= earlier.height {
        return Some(ContradictionReason::StaleBranch);
    }
    if earlier.height > later.max_height_generated {
        return Some(ContradictionReason::UnacknowledgedBlock);
    }
    if earlier.max_height_prevoted > later.max_height_prevoted {
        return Some(ContradictionReason::PrevoteRegression);
    }
    None
}
