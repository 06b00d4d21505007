//! # Shared Types Crate
//!
//! Entities exchanged across subsystem boundaries. The finality layer reads
//! these records but never constructs chain data of its own.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Header and validator-set records are defined
//!   once here and consumed by every subsystem.
//! - **Pre-validated input**: A `BlockHeader` reaching a consumer has already
//!   passed structural and signature checks upstream.

pub mod entities;

pub use entities::*;
