//! Domain module for the BFT finality subsystem
//!
//! ## Core Modules
//! - parameters: Thresholds and weighted validator sets
//! - parameters_store: Height-indexed parameter records
//! - registry: Per-validator vote bookkeeping
//! - vote_info: Per-height tallies and published heights
//! - ledger: Vote window and finality computation
//!
//! ## Header Comparison
//! - fork_choice: Competing tip resolution
//! - equivocation: Contradicting header detection
//!
//! ## Safety
//! - circuit_breaker: Halt latch on consistency violations

pub mod circuit_breaker;
pub mod equivocation;
pub mod fork_choice;
pub mod ledger;
pub mod parameters;
pub mod parameters_store;
pub mod registry;
pub mod vote_info;

pub use circuit_breaker::{BreakerEvent, CircuitBreaker, ProcessingState};
pub use equivocation::{
    are_headers_contradicting, detect_contradiction, ContradictingHeaders, ContradictionReason,
    HeaderClaims,
};
pub use fork_choice::{ForkChoiceResolver, ForkStatus, ObservedHeader};
pub use ledger::VoteLedger;
pub use parameters::{minimum_threshold, supermajority, BftParameters};
pub use parameters_store::{BftParametersStore, ParametersCache, ParametersSource};
pub use registry::{ActiveValidatorVoteInfo, ValidatorWeightRegistry};
pub use vote_info::{BftHeights, BlockBftInfo};
