//! Per-run diagnostics.
//!
//! Each run installs its own subscriber for the current thread only, so that
//! several projects can run one after another (or in tests, side by side)
//! without fighting over a global default.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::RunConfig;
use crate::error::{ConfigError, QuireError};

pub fn parse_level(level: &str) -> Result<Level, ConfigError> {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(ConfigError::InvalidLogLevel(level.to_string())),
    }
}

/// Starts logging to the run's log file. Logging stops when the returned
/// guard is dropped.
pub fn init(config: &RunConfig) -> Result<DefaultGuard, QuireError> {
    let level = parse_level(&config.log_level)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())?;

    let progress = (!config.silent).then(IndicatifLayer::new);

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new(level.as_str().to_ascii_lowercase()))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        )
        .with(progress);

    Ok(tracing::subscriber::set_default(subscriber))
}
