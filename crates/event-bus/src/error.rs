//! # Error Types
//!
//! Errors raised by the event bus. Only configuration problems and
//! `REJECT`-strategy overflow ever reach a caller; listener and drain-loop
//! failures are absorbed into metrics and diagnostics.

use thiserror::Error;

/// Errors returned to callers of the bus.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// Invalid construction parameters (empty listener name, bad config).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Queue at capacity under the `REJECT` overflow strategy.
    #[error("Queue overflow: capacity {capacity} reached")]
    QueueOverflow { capacity: usize },

    /// Unexpected failure inside the drain loop itself.
    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<ConfigError> for BusError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// A listener's handling operation failed.
///
/// Always caught at the invocation site and routed to the listener's error
/// hook, never re-raised to the emitter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerError {
    /// The handler returned an error.
    #[error("Listener '{listener}' failed: {message}")]
    Failed { listener: String, message: String },

    /// The handler panicked.
    #[error("Listener '{listener}' panicked: {message}")]
    Panicked { listener: String, message: String },
}

impl ListenerError {
    /// Name of the listener that failed.
    #[must_use]
    pub fn listener(&self) -> &str {
        match self {
            Self::Failed { listener, .. } | Self::Panicked { listener, .. } => listener,
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// Queue capacity must be at least one.
    #[error("max_size must be greater than zero")]
    ZeroCapacity,

    /// Batch size must be at least one.
    #[error("batch_size must be greater than zero")]
    ZeroBatchSize,

    /// Backpressure threshold outside `(0, 1]`.
    #[error("backpressure_threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    /// Metrics sample window must be at least one.
    #[error("metrics_window must be greater than zero")]
    ZeroMetricsWindow,

    /// Diagnostics channel capacity must be at least one.
    #[error("diagnostics_capacity must be greater than zero")]
    ZeroDiagnosticsCapacity,

    /// Environment variable could not be parsed.
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}
