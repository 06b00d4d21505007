//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements outbound port traits. Production deployments plug their own
//! ordered store into [`crate::ports::KeyValueStore`].

mod memory_store;

pub use memory_store::InMemoryKVStore;
