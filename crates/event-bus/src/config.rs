//! # Bus Configuration
//!
//! Queue and dispatcher settings. All limits have sane defaults with
//! override capability through code or environment variables.

use crate::error::ConfigError;
use crate::{
    DEFAULT_BACKPRESSURE_THRESHOLD, DEFAULT_BATCH_SIZE, DEFAULT_DIAGNOSTICS_CAPACITY,
    DEFAULT_MAX_QUEUE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Policy applied when an event arrives at a full queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverflowStrategy {
    /// Reject the incoming event; queue unchanged.
    DropIncoming,
    /// Evict the earliest-inserted event regardless of priority.
    DropOldest,
    /// Evict the lowest-priority tail event if the incoming one outranks it.
    #[default]
    DropLowestPriority,
    /// Raise `BusError::QueueOverflow` to the producer.
    Reject,
    /// Suspend the producer until capacity frees, up to `block_timeout`.
    Block,
}

impl FromStr for OverflowStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "DROP_INCOMING" => Ok(Self::DropIncoming),
            "DROP_OLDEST" => Ok(Self::DropOldest),
            "DROP_LOWEST_PRIORITY" => Ok(Self::DropLowestPriority),
            "REJECT" => Ok(Self::Reject),
            "BLOCK" => Ok(Self::Block),
            _ => Err(s.to_string()),
        }
    }
}

/// How the drain loop walks the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMode {
    /// One event at a time, fully fanned out before the next dequeue.
    #[default]
    Sequential,
    /// Up to `batch_size` events fanned out concurrently as one unit.
    Batched,
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "batched" | "batch" => Ok(Self::Batched),
            _ => Err(s.to_string()),
        }
    }
}

/// Priority queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of pending events.
    pub max_size: usize,
    /// Policy applied at capacity.
    pub overflow_strategy: OverflowStrategy,
    /// Fraction of `max_size` at which backpressure is signalled.
    pub backpressure_threshold: f64,
    /// Number of processing-time samples kept for the rolling average.
    pub metrics_window: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_QUEUE_SIZE,
            overflow_strategy: OverflowStrategy::default(),
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
            metrics_window: 100,
        }
    }
}

impl QueueConfig {
    /// Queue config with the given capacity and strategy, defaults elsewhere.
    #[must_use]
    pub fn new(max_size: usize, overflow_strategy: OverflowStrategy) -> Self {
        Self {
            max_size,
            overflow_strategy,
            ..Self::default()
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !(self.backpressure_threshold > 0.0 && self.backpressure_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.backpressure_threshold));
        }
        if self.metrics_window == 0 {
            return Err(ConfigError::ZeroMetricsWindow);
        }
        Ok(())
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Queue settings.
    pub queue: QueueConfig,
    /// Sequential or batched draining.
    pub processing_mode: ProcessingMode,
    /// Events per unit in batched mode.
    pub batch_size: usize,
    /// Invoke an event's listeners concurrently instead of one after another.
    pub async_listeners: bool,
    /// Per-event processing time above which a slow-processing diagnostic fires.
    /// Observational only; nothing is cancelled.
    pub max_processing_time: Duration,
    /// How long a producer waits for capacity under the `BLOCK` strategy.
    pub block_timeout: Duration,
    /// Re-enqueue attempts for events with failed listeners. Zero disables retry.
    pub max_retries: u32,
    /// Buffer size of the diagnostics broadcast channel.
    pub diagnostics_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            processing_mode: ProcessingMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            async_listeners: true,
            max_processing_time: Duration::from_secs(1),
            block_timeout: Duration::from_secs(1),
            max_retries: 0,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl DispatcherConfig {
    /// Check value ranges, including the nested queue config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.diagnostics_capacity == 0 {
            return Err(ConfigError::ZeroDiagnosticsCapacity);
        }
        Ok(())
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EVENT_BUS_MAX_QUEUE_SIZE`: Queue capacity (default: 10000)
    /// - `EVENT_BUS_OVERFLOW_STRATEGY`: `DROP_INCOMING`, `DROP_OLDEST`,
    ///   `DROP_LOWEST_PRIORITY`, `REJECT` or `BLOCK` (default: DROP_LOWEST_PRIORITY)
    /// - `EVENT_BUS_BACKPRESSURE_THRESHOLD`: Fraction of capacity (default: 0.8)
    /// - `EVENT_BUS_PROCESSING_MODE`: `sequential` or `batched` (default: sequential)
    /// - `EVENT_BUS_BATCH_SIZE`: Events per batch (default: 100)
    /// - `EVENT_BUS_ASYNC_LISTENERS`: Concurrent fan-out (default: true)
    /// - `EVENT_BUS_MAX_PROCESSING_MS`: Slow-processing threshold (default: 1000)
    /// - `EVENT_BUS_MAX_RETRIES`: Retry budget for failed events (default: 0)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "EVENT_BUS_MAX_QUEUE_SIZE")? {
            config.queue.max_size = v;
        }
        if let Some(v) = parse_var(&lookup, "EVENT_BUS_OVERFLOW_STRATEGY")? {
            config.queue.overflow_strategy = v;
        }
        if let Some(v) = parse_var(&lookup, "EVENT_BUS_BACKPRESSURE_THRESHOLD")? {
            config.queue.backpressure_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "EVENT_BUS_PROCESSING_MODE")? {
            config.processing_mode = v;
        }
        if let Some(v) = parse_var(&lookup, "EVENT_BUS_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = lookup("EVENT_BUS_ASYNC_LISTENERS") {
            config.async_listeners = v.to_lowercase() != "false" && v != "0";
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "EVENT_BUS_MAX_PROCESSING_MS")? {
            config.max_processing_time = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var(&lookup, "EVENT_BUS_MAX_RETRIES")? {
            config.max_retries = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
    }
}
