//! # Quantum-Chain BFT Finality Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── finality_benchmarks.rs  # Header ingestion and fork choice throughput
//! │
//! └── src/integration/
//!     ├── fixtures.rs             # Service setup, chain driver, logging
//!     ├── finality_flows.rs       # Reference scenarios and operator flows
//!     └── properties.rs           # Randomized invariant checks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # By category
//! cargo test -p qc-tests integration::finality_flows
//! cargo test -p qc-tests integration::properties
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

#![allow(dead_code)]

pub mod integration;
