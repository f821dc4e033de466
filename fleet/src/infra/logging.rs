//! Tracing subscriber setup for programs embedding the fleet.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the caller.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Human-readable logs filtered by `RUST_LOG` (default `info`).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init() -> Result<()> {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| anyhow!("cannot install log subscriber: {e}"))
}

/// One JSON object per event, for log aggregation.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_json() -> Result<()> {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .try_init()
        .map_err(|e| anyhow!("cannot install log subscriber: {e}"))
}
