//! Ports module for the BFT finality subsystem

pub mod inbound;
pub mod outbound;

pub use inbound::{BftApi, BftSnapshot};
pub use outbound::{BatchOperation, IterateOptions, KVStoreError, KeyValueStore};
