//! Logging setup shared by chatlink binaries.
//!
//! Libraries only emit `tracing` events and `metrics` counters; installing a
//! subscriber is left to the process that embeds them, through
//! [`init_telemetry`] or the [`install`] shorthand.

use anyhow::Result;

mod config;
mod tracing_init;

pub use config::TelemetryConfig;
pub use tracing_init::{init_telemetry, with_session_fields};

/// Installs the subscriber configured from the process environment.
pub fn install() -> Result<()> {
    init_telemetry(TelemetryConfig::from_env())
}
