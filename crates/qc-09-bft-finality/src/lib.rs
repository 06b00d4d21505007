//! # qc-09-bft-finality
//!
//! BFT finality layer for a delegated-proof-of-stake chain.
//!
//! ## Overview
//!
//! This subsystem provides:
//! - **Vote Ledger**: Weighted prevote/precommit tallies over a sliding
//!   window of headers, yielding the prevoted and finalized heights
//! - **Parameters Store**: Height-indexed thresholds and validator sets
//! - **Validator Registry**: Replay protection across validator-set changes
//! - **Fork Choice**: Deterministic resolution between competing tips
//! - **Equivocation Detection**: Contradicting headers from one generator
//! - **Circuit Breaker**: Halt on any attempt to lower the finalized height
//!
//! ## Architecture
//!
//! ```text
//! Block pipeline ──BlockHeader──→ BFT Finality (9)
//!                                     │
//!                                     ├── BftHeights ──→ Block Storage / Sync
//!                                     │
//!                                     ├── ForkStatus ──→ Pipeline (revert / sync)
//!                                     │
//!                                     └── ContradictingHeaders ──→ Misbehavior reporting
//! ```
//!
//! ## Invariants
//!
//! | Invariant | Enforced by |
//! |-----------|-------------|
//! | `precommitted <= prevoted <= tip` | `VoteLedger` forward-only scans |
//! | Finalized height never decreases | `VoteLedger`, halt latch in `BftService` |
//! | One vote per validator per height | Voter bitmaps in `BlockBftInfo` |
//! | `largest_height_precommit` never decreases | `ValidatorWeightRegistry` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use qc_09_bft_finality::{BftConfig, BftParameters, BftService, InMemoryKVStore};
//! use qc_09_bft_finality::ports::inbound::BftApi;
//!
//! let genesis = BftParameters::from_validators(validators)?;
//! let service = BftService::new(BftConfig::from_env(), InMemoryKVStore::new(), genesis)?;
//!
//! let heights = service.add_block_header(&header)?;
//! println!("finalized: {}", heights.max_height_precommitted);
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

pub use adapters::InMemoryKVStore;
pub use config::{BftConfig, ForkChoiceConfig, PrecommitRule, SlotBasis};
pub use domain::{
    are_headers_contradicting, detect_contradiction, ActiveValidatorVoteInfo, BftHeights,
    BftParameters, BftParametersStore, BlockBftInfo, CircuitBreaker, ContradictingHeaders,
    ContradictionReason, ForkChoiceResolver, ForkStatus, ObservedHeader, ParametersCache,
    ParametersSource, ProcessingState, ValidatorWeightRegistry, VoteLedger,
};
pub use error::{BftError, BftResult};
pub use ports::inbound::{BftApi, BftSnapshot};
pub use ports::outbound::{KVStoreError, KeyValueStore};
pub use service::BftService;
