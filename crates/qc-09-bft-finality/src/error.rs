//! Error types for the BFT finality subsystem

use crate::ports::outbound::KVStoreError;
use shared_types::Address;
use thiserror::Error;

/// BFT finality errors
#[derive(Debug, Error)]
pub enum BftError {
    /// Out-of-sequence height or impossible claimed heights. The block is
    /// invalid and must not be retried unmodified.
    #[error("Invalid header at height {height}: {reason}")]
    InvalidHeader { height: u32, reason: String },

    /// No parameters are reachable from the requested height
    #[error("BFT parameters not found for height {height}")]
    ParametersNotFound { height: u32 },

    /// Parameters already stored at this effective height
    #[error("BFT parameters already exist at height {height}")]
    DuplicateParameters { height: u32 },

    /// Parameters failed construction checks
    #[error("Invalid BFT parameters: {reason}")]
    InvalidParameters { reason: String },

    /// Precommit below the validator's largest precommitted height
    #[error("Stale vote at height {height}: largest precommit is {largest}")]
    StaleVote { height: u32, largest: u32 },

    /// Validator has no vote bookkeeping entry
    #[error("Unknown validator: {}", hex::encode(.address))]
    UnknownValidator { address: Address },

    /// An operation would lower the finalized height
    #[error("Consistency violation: {reason}")]
    ConsistencyViolation { reason: String },

    /// Processing halted after a consistency violation
    #[error("System halted awaiting intervention - consistency violation recorded")]
    SystemHalted,

    /// Requested range is not retained in the vote window
    #[error("Height {height} outside vote window [{window_start}, {tip}]")]
    OutOfWindow {
        height: u32,
        window_start: u32,
        tip: u32,
    },

    /// Certified height above the finalized height
    #[error("Certified height {height} exceeds finalized height {finalized}")]
    InvalidCertifiedHeight { height: u32, finalized: u32 },

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    /// Stored record could not be decoded
    #[error("Codec error: {reason}")]
    Codec { reason: String },
}

impl BftError {
    /// Shorthand for header rejections.
    pub fn invalid_header(height: u32, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            height,
            reason: reason.into(),
        }
    }

    /// Errors that indicate a defect in bootstrap, pruning or storage rather
    /// than a bad input. These are surfaced to the operator, never defaulted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ParametersNotFound { .. }
                | Self::ConsistencyViolation { .. }
                | Self::SystemHalted
                | Self::Storage(_)
                | Self::Codec { .. }
        )
    }

    /// Expected during normal operation and deduplicated silently.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::StaleVote { .. })
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidHeader { .. } => "invalid_header",
            Self::ParametersNotFound { .. } => "parameters_not_found",
            Self::DuplicateParameters { .. } => "duplicate_parameters",
            Self::InvalidParameters { .. } => "invalid_parameters",
            Self::StaleVote { .. } => "stale_vote",
            Self::UnknownValidator { .. } => "unknown_validator",
            Self::ConsistencyViolation { .. } => "consistency_violation",
            Self::SystemHalted => "system_halted",
            Self::OutOfWindow { .. } => "out_of_window",
            Self::InvalidCertifiedHeight { .. } => "invalid_certified_height",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Storage(_) => "storage",
            Self::Codec { .. } => "codec",
        }
    }
}

/// Result type for BFT operations
pub type BftResult<T> = Result<T, BftError>;
