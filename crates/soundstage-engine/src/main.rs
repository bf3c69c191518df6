//! # Soundstage
//!
//! Command-line driver for the sound channel engine.
//!
//! Runs a scripted tick loop against the simulated device: a few emitters
//! start looping and one-shot sounds, the device is pulled partway through
//! and later restored, and the engine is expected to bring every looping
//! sound back where it left off.
//!
//! ```text
//! soundstage [CONFIG]
//! ```
//!
//! Without an argument the config is read from the platform config
//! directory, and the defaults are written there on first run. `RUST_LOG` overrides the configured log filter.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod app;
mod config;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::EngineConfig;

/// Main entry point.
fn main() -> Result<()> {
    let mut config = match std::env::args_os().nth(1) {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load_or_create(),
    };
    config.validate();

    let directive = config
        .log_filter
        .parse()
        .with_context(|| format!("invalid log filter '{}'", config.log_filter))?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(directive))
        .init();

    info!("Soundstage starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let report = app::run(&config).context("demo run failed")?;
    print!("{}", report.channel_dump);
    info!(
        "Finished {} ticks: {} voices started, {} channels active, peak {} evicted",
        report.ticks, report.voices_started, report.active_channels, report.peak_evicted
    );
    if !report.ambient_live {
        warn!("Ambient loop was not playing at the end of the run");
    }
    Ok(())
}
