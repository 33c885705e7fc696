//! Process-wide log subscriber setup.
//!
//! The crate logs through the `log` macros and opens `tracing` spans around
//! job execution. `init_logging` installs a `tracing` subscriber and bridges
//! `log` records into it, so both end up in the same output.

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{BatchError, Result};

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured filter.
///
/// Only one subscriber can exist per process; a second call returns
/// [`BatchError::Logging`].
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| BatchError::Logging(format!("invalid filter '{}': {}", config.filter, e)))?,
    };

    let (text, json) = match config.format {
        LogFormat::Text => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_current_span(true))),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| BatchError::Logging(e.to_string()))?;
    LogTracer::init().map_err(|e| BatchError::Logging(e.to_string()))?;

    log::debug!("Logging initialized ({:?} format)", config.format);
    Ok(())
}
