//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber: an `EnvFilter` built from
//! `RUST_LOG` (or the configured level) plus a human-readable or JSON
//! `fmt` layer. The JSON layer is what log shippers expect in containers.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Build the level filter for `config`.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Logging(e.to_string()))
}

/// Install the global subscriber.
///
/// # Errors
/// - `Logging` if the filter directive is invalid or a global subscriber
///   is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;

    if !config.console_output {
        tracing_subscriber::registry()
            .with(filter)
            .try_init()
            .map_err(|e| TelemetryError::Logging(e.to_string()))?;
        return Ok(());
    }

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::Logging(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::Logging(e.to_string()))?;
    }

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}
