//! # Quantum Telemetry
//!
//! Structured logging bootstrap shared by the finality subsystem and its
//! test suite. Library code only emits `tracing` events; binaries and test
//! harnesses call [`init_logging`] once to install a subscriber.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quantum_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::for_subsystem("09", "bft-finality");
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `quantum-chain` | Service name in the startup record |
//! | `QC_LOG_LEVEL` | `info` | Log filter (`RUST_LOG` overrides) |
//! | `QC_SUBSYSTEM_ID` | `00` | Subsystem identifier |
//! | `QC_JSON_LOGS` | `false` | JSON output |
//! | `QC_CONSOLE_OUTPUT` | `true` | Write records to stdout |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
