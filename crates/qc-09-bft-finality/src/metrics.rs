//! # BFT Finality Metrics
//!
//! Prometheus metrics for monitoring vote tallying and fork choice.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! qc-09-bft-finality = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `bft_max_height_prevoted` - Gauge of the highest prevote-confirmed height
//! - `bft_max_height_precommitted` - Gauge of the finalized height
//! - `bft_max_height_certified` - Gauge of the certified height
//! - `bft_headers_applied_total` - Counter of headers added to the vote window
//! - `bft_headers_rejected_total` - Counter of rejected headers (by reason)
//! - `bft_stale_votes_total` - Counter of precommits dropped as stale
//! - `bft_fork_choice_total` - Counter of fork choice outcomes (by outcome)
//! - `bft_contradictions_total` - Counter of contradicting header pairs (by rule)
//! - `bft_halted` - Gauge of the halt latch (0=Running, 1=Halted)

#[cfg(feature = "metrics")]
use crate::domain::BftHeights;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Gauge, IntCounter,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Highest prevote-confirmed height
    pub static ref MAX_HEIGHT_PREVOTED: Gauge = register_gauge!(
        "bft_max_height_prevoted",
        "Highest height with prevote weight at or above the prevote threshold"
    )
    .expect("Failed to create MAX_HEIGHT_PREVOTED metric");

    /// Finalized height
    pub static ref MAX_HEIGHT_PRECOMMITTED: Gauge = register_gauge!(
        "bft_max_height_precommitted",
        "Finalized height"
    )
    .expect("Failed to create MAX_HEIGHT_PRECOMMITTED metric");

    /// Certified height
    pub static ref MAX_HEIGHT_CERTIFIED: Gauge = register_gauge!(
        "bft_max_height_certified",
        "Highest certified height"
    )
    .expect("Failed to create MAX_HEIGHT_CERTIFIED metric");

    /// Headers applied to the vote window
    pub static ref HEADERS_APPLIED: IntCounter = register_int_counter!(
        "bft_headers_applied_total",
        "Total number of headers added to the vote window"
    )
    .expect("Failed to create HEADERS_APPLIED metric");

    /// Headers rejected, labeled by reason
    pub static ref HEADERS_REJECTED: CounterVec = register_counter_vec!(
        "bft_headers_rejected_total",
        "Total number of headers rejected",
        &["reason"]
    )
    .expect("Failed to create HEADERS_REJECTED metric");

    /// Precommits dropped as stale
    pub static ref STALE_VOTES: IntCounter = register_int_counter!(
        "bft_stale_votes_total",
        "Total number of precommits dropped as stale"
    )
    .expect("Failed to create STALE_VOTES metric");

    /// Fork choice outcomes, labeled by outcome
    pub static ref FORK_CHOICE: CounterVec = register_counter_vec!(
        "bft_fork_choice_total",
        "Total number of fork choice decisions",
        &["outcome"]
    )
    .expect("Failed to create FORK_CHOICE metric");

    /// Contradicting header pairs, labeled by rule
    pub static ref CONTRADICTIONS: CounterVec = register_counter_vec!(
        "bft_contradictions_total",
        "Total number of contradicting header pairs detected",
        &["rule"]
    )
    .expect("Failed to create CONTRADICTIONS metric");

    /// Halt latch state (0=Running, 1=Halted)
    pub static ref HALTED: Gauge = register_gauge!(
        "bft_halted",
        "Whether processing is halted awaiting intervention (0=no, 1=yes)"
    )
    .expect("Failed to create HALTED metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

/// Publish the current finality heights
#[cfg(feature = "metrics")]
pub fn set_heights(heights: &BftHeights) {
    MAX_HEIGHT_PREVOTED.set(heights.max_height_prevoted as f64);
    MAX_HEIGHT_PRECOMMITTED.set(heights.max_height_precommitted as f64);
    MAX_HEIGHT_CERTIFIED.set(heights.max_height_certified as f64);
}

#[cfg(feature = "metrics")]
pub fn record_header_applied() {
    HEADERS_APPLIED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_header_rejected(reason: &str) {
    HEADERS_REJECTED.with_label_values(&[reason]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_stale_vote() {
    STALE_VOTES.inc();
}

#[cfg(feature = "metrics")]
pub fn record_fork_choice(outcome: &str) {
    FORK_CHOICE.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_contradiction(rule: &str) {
    CONTRADICTIONS.with_label_values(&[rule]).inc();
}

#[cfg(feature = "metrics")]
pub fn set_halted(halted: bool) {
    HALTED.set(if halted { 1.0 } else { 0.0 });
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn set_heights(_heights: &crate::domain::BftHeights) {}

#[cfg(not(feature = "metrics"))]
pub fn record_header_applied() {}

#[cfg(not(feature = "metrics"))]
pub fn record_header_rejected(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_stale_vote() {}

#[cfg(not(feature = "metrics"))]
pub fn record_fork_choice(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_contradiction(_rule: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn set_halted(_halted: bool) {}
