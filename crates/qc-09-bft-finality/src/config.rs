//! BFT finality configuration.

use crate::error::{BftError, BftResult};
use std::env;
use std::str::FromStr;

/// Which heights a header counts as precommits for.
///
/// Every rule still passes each candidate height through the validator's
/// `largest_height_precommit` check and the per-height voter set, so a
/// validator precommits a height at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PrecommitRule {
    /// Precommit every height the header prevotes above the finalized height.
    ///
    /// This is a relaxation of a precommit: it also covers the header's own
    /// height and heights that have no observed prevote quorum yet. It is
    /// the rule under which four equal validators finalize the third height
    /// once the fourth header arrives; [`PrecommitRule::PrevoteQuorum`]
    /// follows the strict meaning at the cost of a longer lag.
    #[default]
    PrevotedRange,
    /// Precommit heights below the header that were already prevote-confirmed
    /// before the header arrived. A precommit in the strict sense.
    PrevoteQuorum,
    /// Precommit exactly `min(height - 1, max_height_generated)`.
    SingleHeight,
}

impl FromStr for PrecommitRule {
    type Err = BftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prevoted-range" => Ok(Self::PrevotedRange),
            "prevote-quorum" => Ok(Self::PrevoteQuorum),
            "single-height" => Ok(Self::SingleHeight),
            other => Err(BftError::InvalidConfig {
                reason: format!("unknown precommit rule '{}'", other),
            }),
        }
    }
}

/// Time source used to place a header into a time-slot for tie-breaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SlotBasis {
    /// Local arrival time supplied by the caller.
    #[default]
    ArrivalTime,
    /// Timestamp the block was forged for.
    ForgingTimestamp,
}

impl FromStr for SlotBasis {
    type Err = BftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arrival" => Ok(Self::ArrivalTime),
            "timestamp" => Ok(Self::ForgingTimestamp),
            other => Err(BftError::InvalidConfig {
                reason: format!("unknown slot basis '{}'", other),
            }),
        }
    }
}

/// Fork choice configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForkChoiceConfig {
    /// Slot length in seconds
    pub block_time: u64,
    /// Time source for slot comparison
    pub slot_basis: SlotBasis,
}

impl Default for ForkChoiceConfig {
    fn default() -> Self {
        Self {
            block_time: 10,
            slot_basis: SlotBasis::ArrivalTime,
        }
    }
}

impl ForkChoiceConfig {
    /// Slot number for a point in time.
    pub fn slot_of(&self, time: u64) -> u64 {
        time / self.block_time.max(1)
    }
}

/// BFT finality configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BftConfig {
    /// Height of the genesis block; both finality heights start here
    pub genesis_height: u32,
    /// Blocks per round; the vote window keeps three rounds
    pub round_length: u32,
    /// Precommit counting rule
    pub precommit_rule: PrecommitRule,
    /// Fork choice settings
    pub fork_choice: ForkChoiceConfig,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            genesis_height: 0,
            round_length: 103,
            precommit_rule: PrecommitRule::default(),
            fork_choice: ForkChoiceConfig::default(),
        }
    }
}

impl BftConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QC_BFT_GENESIS_HEIGHT`: Genesis height (default: 0)
    /// - `QC_BFT_ROUND_LENGTH`: Blocks per round (default: 103)
    /// - `QC_BFT_PRECOMMIT_RULE`: `prevoted-range`, `prevote-quorum` or `single-height`
    /// - `QC_BFT_BLOCK_TIME`: Slot length in seconds (default: 10)
    /// - `QC_BFT_SLOT_BASIS`: `arrival` or `timestamp`
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            genesis_height: parse_env("QC_BFT_GENESIS_HEIGHT").unwrap_or(defaults.genesis_height),
            round_length: parse_env("QC_BFT_ROUND_LENGTH").unwrap_or(defaults.round_length),
            precommit_rule: parse_env("QC_BFT_PRECOMMIT_RULE")
                .unwrap_or(defaults.precommit_rule),
            fork_choice: ForkChoiceConfig {
                block_time: parse_env("QC_BFT_BLOCK_TIME")
                    .unwrap_or(defaults.fork_choice.block_time),
                slot_basis: parse_env("QC_BFT_SLOT_BASIS")
                    .unwrap_or(defaults.fork_choice.slot_basis),
            },
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> BftResult<()> {
        if self.round_length == 0 {
            return Err(BftError::InvalidConfig {
                reason: "round_length must be positive".into(),
            });
        }
        if self.fork_choice.block_time == 0 {
            return Err(BftError::InvalidConfig {
                reason: "block_time must be positive".into(),
            });
        }
        Ok(())
    }

    /// Number of headers retained in the vote window.
    pub fn window_capacity(&self) -> usize {
        (self.round_length as usize).saturating_mul(3)
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
