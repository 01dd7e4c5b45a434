//! Prometheus metrics for the event bus.
//!
//! All metrics follow the naming convention: `event_bus_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: mirrors the queue's cumulative totals (enqueued, processed, ...)
//! - **Gauge**: point-in-time values (queue size, processing rate, backpressure)
//! - **CounterVec**: diagnostics by kind, listener failures by listener name
//!
//! The registry is process-wide and mirrors one dispatcher.

use event_bus::{Diagnostic, QueueMetrics};
use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // QUEUE METRICS
    // =========================================================================

    /// Current number of queued events
    pub static ref QUEUE_SIZE: IntGauge = IntGauge::new(
        "event_bus_queue_size",
        "Number of events waiting in the priority queue"
    ).expect("metric creation failed");

    /// Configured queue capacity
    pub static ref QUEUE_CAPACITY: IntGauge = IntGauge::new(
        "event_bus_queue_capacity",
        "Maximum number of events the queue holds"
    ).expect("metric creation failed");

    /// Highest queue size observed
    pub static ref QUEUE_PEAK_SIZE: IntGauge = IntGauge::new(
        "event_bus_queue_peak_size",
        "Highest number of queued events observed"
    ).expect("metric creation failed");

    /// Whether the queue is above its backpressure threshold (0/1)
    pub static ref BACKPRESSURE_ACTIVE: IntGauge = IntGauge::new(
        "event_bus_backpressure_active",
        "1 while queue occupancy is at or above the backpressure threshold"
    ).expect("metric creation failed");

    // =========================================================================
    // THROUGHPUT METRICS
    // =========================================================================

    /// Events accepted into the queue
    pub static ref EVENTS_ENQUEUED: IntCounter = IntCounter::new(
        "event_bus_events_enqueued_total",
        "Total events accepted into the queue"
    ).expect("metric creation failed");

    /// Events delivered with every listener succeeding
    pub static ref EVENTS_PROCESSED: IntCounter = IntCounter::new(
        "event_bus_events_processed_total",
        "Total events processed without listener failures"
    ).expect("metric creation failed");

    /// Events with at least one failed listener
    pub static ref EVENTS_FAILED: IntCounter = IntCounter::new(
        "event_bus_events_failed_total",
        "Total events where at least one listener failed"
    ).expect("metric creation failed");

    /// Events rejected or evicted by the overflow policy
    pub static ref EVENTS_DROPPED: IntCounter = IntCounter::new(
        "event_bus_events_dropped_total",
        "Total events lost to the overflow policy"
    ).expect("metric creation failed");

    /// Rolling average processing time
    pub static ref PROCESSING_TIME_SECONDS: Gauge = Gauge::new(
        "event_bus_processing_time_seconds",
        "Rolling average time to fan one event out to its listeners"
    ).expect("metric creation failed");

    /// Processing throughput
    pub static ref PROCESSING_RATE: Gauge = Gauge::new(
        "event_bus_processing_rate_per_second",
        "Events processed per second"
    ).expect("metric creation failed");

    // =========================================================================
    // DIAGNOSTICS
    // =========================================================================

    /// Diagnostics observed, by kind
    pub static ref DIAGNOSTICS: IntCounterVec = IntCounterVec::new(
        Opts::new("event_bus_diagnostics_total", "Diagnostics published by the dispatcher"),
        &["kind"]
    ).expect("metric creation failed");

    /// Unhandled listener failures, by listener name
    pub static ref LISTENER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("event_bus_listener_failures_total", "Listener failures without an error hook"),
        &["listener"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Queue
        Box::new(QUEUE_SIZE.clone()),
        Box::new(QUEUE_CAPACITY.clone()),
        Box::new(QUEUE_PEAK_SIZE.clone()),
        Box::new(BACKPRESSURE_ACTIVE.clone()),
        // Throughput
        Box::new(EVENTS_ENQUEUED.clone()),
        Box::new(EVENTS_PROCESSED.clone()),
        Box::new(EVENTS_FAILED.clone()),
        Box::new(EVENTS_DROPPED.clone()),
        Box::new(PROCESSING_TIME_SECONDS.clone()),
        Box::new(PROCESSING_RATE.clone()),
        // Diagnostics
        Box::new(DIAGNOSTICS.clone()),
        Box::new(LISTENER_FAILURES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Mirror a queue metrics snapshot into the registry.
pub fn record_queue_metrics(metrics: &QueueMetrics) {
    QUEUE_SIZE.set(saturating_i64(metrics.size));
    QUEUE_CAPACITY.set(saturating_i64(metrics.capacity));
    QUEUE_PEAK_SIZE.set(saturating_i64(metrics.peak_size));
    BACKPRESSURE_ACTIVE.set(i64::from(metrics.backpressure_active));

    advance(&EVENTS_ENQUEUED, metrics.total_enqueued);
    advance(&EVENTS_PROCESSED, metrics.total_processed);
    advance(&EVENTS_FAILED, metrics.total_failed);
    advance(&EVENTS_DROPPED, metrics.total_dropped);

    PROCESSING_TIME_SECONDS.set(metrics.average_processing_time.as_secs_f64());
    PROCESSING_RATE.set(metrics.processing_rate);
}

/// Count one diagnostic.
pub fn record_diagnostic(diagnostic: &Diagnostic) {
    DIAGNOSTICS
        .with_label_values(&[diagnostic_kind(diagnostic)])
        .inc();
    if let Diagnostic::ListenerFailed { listener, .. } = diagnostic {
        LISTENER_FAILURES.with_label_values(&[listener.as_str()]).inc();
    }
}

/// Label value for a diagnostic variant.
pub fn diagnostic_kind(diagnostic: &Diagnostic) -> &'static str {
    match diagnostic {
        Diagnostic::ListenerAdded { .. } => "listener_added",
        Diagnostic::ListenerRemoved { .. } => "listener_removed",
        Diagnostic::FilteredSubscriptionAdded { .. } => "filtered_subscription_added",
        Diagnostic::FilteredSubscriptionRemoved { .. } => "filtered_subscription_removed",
        Diagnostic::RouteCreated { .. } => "route_created",
        Diagnostic::RouteRemoved { .. } => "route_removed",
        Diagnostic::RouteActiveChanged { .. } => "route_active_changed",
        Diagnostic::ListenerAddedToRoute { .. } => "listener_added_to_route",
        Diagnostic::ListenerRemovedFromRoute { .. } => "listener_removed_from_route",
        Diagnostic::Backpressure { .. } => "backpressure",
        Diagnostic::EventDropped { .. } => "event_dropped",
        Diagnostic::BatchDropped { .. } => "batch_dropped",
        Diagnostic::BatchProcessed { .. } => "batch_processed",
        Diagnostic::SlowProcessing { .. } => "slow_processing",
        Diagnostic::ProcessingError { .. } => "processing_error",
        Diagnostic::ListenerFailed { .. } => "listener_failed",
    }
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Counters only move forward; a lower snapshot (e.g. another bus) is ignored.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
