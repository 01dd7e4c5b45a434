//! # Bus Telemetry
//!
//! Observability for processes embedding the event bus.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter` and a pretty or
//!   JSON `fmt` layer
//! - **Metrics**: Prometheus gauges/counters mirroring `QueueMetrics`, plus
//!   counters fed from the dispatcher's diagnostics channel
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, spawn_recorder, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     init_telemetry(&TelemetryConfig::from_env()).expect("Failed to init telemetry");
//!     let bus = event_bus::Dispatcher::with_defaults();
//!     let _recorder = spawn_recorder(bus.clone(), std::time::Duration::from_secs(5));
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `event-bus` | Service name in log lines |
//! | `EVENT_BUS_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `EVENT_BUS_JSON_LOGS` | `false` | JSON output (defaults to `true` in containers) |
//! | `EVENT_BUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
mod metrics;
mod recorder;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};
pub use metrics::{
    diagnostic_kind, gather_metrics, record_diagnostic, record_queue_metrics, register_metrics,
    BACKPRESSURE_ACTIVE, DIAGNOSTICS, EVENTS_DROPPED, EVENTS_ENQUEUED, EVENTS_FAILED,
    EVENTS_PROCESSED, LISTENER_FAILURES, PROCESSING_RATE, PROCESSING_TIME_SECONDS,
    QUEUE_CAPACITY, QUEUE_PEAK_SIZE, QUEUE_SIZE, REGISTRY,
};
pub use recorder::spawn_recorder;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the global log subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    // Metrics first; they do not depend on the subscriber
    register_metrics()?;
    init_logging(config)
}
