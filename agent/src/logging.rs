//! Diagnostic tracing for the `agent` binary.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. It is separate from
//! the run artifacts (`memory.json`, `run_state.json`, `iterations/<n>/`,
//! `report.json`), which are always written whatever the filter says.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once, at startup.
///
/// `default_level` applies when `RUST_LOG` is unset, e.g.
/// `RUST_LOG=agent=debug agent run` to see prompt detection and task updates.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
