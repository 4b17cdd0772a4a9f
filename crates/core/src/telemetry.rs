use thiserror::Error;
use tracing::Level;

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Installs the global tracing subscriber from logging config. Call once at
/// process startup, before any workflow operation runs.
pub fn init(logging: &LoggingConfig) -> Result<(), TelemetryError> {
    let log_level = logging.level.parse::<Level>().unwrap_or(Level::INFO);

    let result = match logging.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .compact()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .pretty()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .json()
            .try_init(),
    };

    result.map_err(|_| TelemetryError::AlreadyInitialized)
}
