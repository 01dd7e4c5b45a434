//! # Priority Queue - Bounded, Priority-Ordered Event Buffer
//!
//! Holds pending events under a capacity bound and applies the configured
//! [`OverflowStrategy`] when full.
//!
//! ## Data Structures
//!
//! - `by_order`: O(log n) priority order, keyed by `(Reverse(priority), seq)`
//! - `by_insertion`: O(log n) insertion order (`seq -> priority`) for `DROP_OLDEST`
//!
//! ## Invariants Enforced
//!
//! - Dequeue order is descending priority, FIFO within a priority tier
//!   (the monotonically increasing `seq` breaks ties).
//! - `len() <= capacity()` after every operation.
//! - Both indices always hold exactly the same entries.

use crate::config::{OverflowStrategy, QueueConfig};
use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;
use trading_types::{Event, EventPriority};

/// Minimum window over which the processing rate is recomputed.
const RATE_WINDOW: Duration = Duration::from_secs(1);

type OrderKey = (Reverse<EventPriority>, u64);

/// An event waiting in the queue.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// The event itself, never modified while queued.
    pub event: Event,
    /// When the event entered the queue.
    pub enqueued_at: Instant,
    /// How many times this event has been re-enqueued after a failure.
    pub retries: u32,
    seq: u64,
}

impl QueuedEvent {
    /// Time spent in the queue so far.
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Result of a successful `enqueue` call.
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Inserted without evicting anything.
    Accepted,
    /// Inserted after evicting the returned event.
    Evicted(QueuedEvent),
    /// Not inserted; the event is handed back to the caller.
    Rejected(Event),
}

impl EnqueueOutcome {
    /// Whether the incoming event entered the queue.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Drain engine state, reported through queue metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    /// No drain running.
    #[default]
    Idle,
    /// A drain loop is running.
    Processing,
    /// Paused by the owner; informational until resumed.
    Paused,
    /// A forced drain (shutdown) is running.
    Draining,
    /// The drain loop hit an unexpected failure.
    Error,
}

/// Point-in-time view of queue metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Current number of queued events.
    pub size: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Highest size ever observed.
    pub peak_size: usize,
    /// Events accepted into the queue.
    pub total_enqueued: u64,
    /// Events fanned out with every listener succeeding.
    pub total_processed: u64,
    /// Events rejected or evicted by the overflow policy.
    pub total_dropped: u64,
    /// Events where at least one listener failed.
    pub total_failed: u64,
    /// Rolling average over the last `metrics_window` processing times.
    pub average_processing_time: Duration,
    /// Events per second, recomputed on windows of at least one second.
    pub processing_rate: f64,
    /// Drain engine state.
    pub state: ProcessingState,
    /// Whether occupancy is at or above the backpressure threshold.
    pub backpressure_active: bool,
}

#[derive(Debug)]
struct MetricsTracker {
    peak_size: usize,
    total_enqueued: u64,
    total_processed: u64,
    total_dropped: u64,
    total_failed: u64,
    samples: VecDeque<Duration>,
    window: usize,
    rate_window_start: Instant,
    rate_window_count: u64,
    processing_rate: f64,
    state: ProcessingState,
}

impl MetricsTracker {
    fn new(window: usize) -> Self {
        Self {
            peak_size: 0,
            total_enqueued: 0,
            total_processed: 0,
            total_dropped: 0,
            total_failed: 0,
            samples: VecDeque::with_capacity(window),
            window,
            rate_window_start: Instant::now(),
            rate_window_count: 0,
            processing_rate: 0.0,
            state: ProcessingState::Idle,
        }
    }

    fn record_sample(&mut self, elapsed: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);

        self.rate_window_count += 1;
        let window_elapsed = self.rate_window_start.elapsed();
        if window_elapsed >= RATE_WINDOW {
            self.processing_rate = self.rate_window_count as f64 / window_elapsed.as_secs_f64();
            self.rate_window_count = 0;
            self.rate_window_start = Instant::now();
        }
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }
}

/// Bounded priority queue of pending events.
#[derive(Debug)]
pub struct PriorityQueue {
    config: QueueConfig,
    by_order: BTreeMap<OrderKey, QueuedEvent>,
    by_insertion: BTreeMap<u64, EventPriority>,
    next_seq: u64,
    metrics: MetricsTracker,
}

impl PriorityQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        let metrics = MetricsTracker::new(config.metrics_window.max(1));
        Self {
            config,
            by_order: BTreeMap::new(),
            by_insertion: BTreeMap::new(),
            next_seq: 0,
            metrics,
        }
    }

    /// Creates a queue with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns the number of queued events.
    pub fn len(&self) -> usize {
        self.by_order.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.by_order.is_empty()
    }

    /// Returns the capacity bound.
    pub fn capacity(&self) -> usize {
        self.config.max_size
    }

    /// Returns true if at capacity.
    pub fn is_full(&self) -> bool {
        self.len() >= self.config.max_size
    }

    /// True once `len >= capacity * backpressure_threshold`.
    pub fn is_backpressure_active(&self) -> bool {
        self.len() as f64 >= self.config.max_size as f64 * self.config.backpressure_threshold
    }

    /// Adds an event, applying the overflow strategy when full.
    ///
    /// # Errors
    /// - `QueueOverflow` under `OverflowStrategy::Reject` when full; the
    ///   queue and its metrics are left untouched.
    pub fn enqueue(&mut self, event: Event) -> Result<EnqueueOutcome, BusError> {
        self.push(event, 0)
    }

    /// Re-adds a previously dequeued event, bumping its retry counter.
    ///
    /// The event goes to the back of its priority tier.
    pub fn requeue(&mut self, queued: QueuedEvent) -> Result<EnqueueOutcome, BusError> {
        self.push(queued.event, queued.retries.saturating_add(1))
    }

    fn push(&mut self, event: Event, retries: u32) -> Result<EnqueueOutcome, BusError> {
        if !self.is_full() {
            self.insert(event, retries);
            return Ok(EnqueueOutcome::Accepted);
        }

        match self.config.overflow_strategy {
            OverflowStrategy::Reject => Err(BusError::QueueOverflow {
                capacity: self.config.max_size,
            }),
            // The dispatcher waits and retries; the drop is only counted if
            // it gives up.
            OverflowStrategy::Block => Ok(EnqueueOutcome::Rejected(event)),
            OverflowStrategy::DropIncoming => Ok(self.reject(event)),
            OverflowStrategy::DropOldest => match self.pop_oldest() {
                Some(evicted) => {
                    self.metrics.total_dropped += 1;
                    self.insert(event, retries);
                    Ok(EnqueueOutcome::Evicted(evicted))
                }
                None => Ok(self.reject(event)),
            },
            OverflowStrategy::DropLowestPriority => {
                let outranks_tail = self
                    .peek_lowest()
                    .is_some_and(|lowest| event.priority > lowest.event.priority);
                if !outranks_tail {
                    return Ok(self.reject(event));
                }
                match self.pop_lowest() {
                    Some(evicted) => {
                        self.metrics.total_dropped += 1;
                        self.insert(event, retries);
                        Ok(EnqueueOutcome::Evicted(evicted))
                    }
                    None => Ok(self.reject(event)),
                }
            }
        }
    }

    fn reject(&mut self, event: Event) -> EnqueueOutcome {
        self.metrics.total_dropped += 1;
        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            priority = %event.priority,
            "Event rejected by full queue"
        );
        EnqueueOutcome::Rejected(event)
    }

    /// Internal insert without capacity checks (assumes room was made).
    fn insert(&mut self, event: Event, retries: u32) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let priority = event.priority;
        self.by_insertion.insert(seq, priority);
        self.by_order.insert(
            (Reverse(priority), seq),
            QueuedEvent {
                event,
                enqueued_at: Instant::now(),
                retries,
                seq,
            },
        );

        self.metrics.total_enqueued += 1;
        self.metrics.peak_size = self.metrics.peak_size.max(self.len());
    }

    /// Removes the head (highest priority, earliest inserted).
    pub fn dequeue(&mut self) -> Option<QueuedEvent> {
        let (_, queued) = self.by_order.pop_first()?;
        self.by_insertion.remove(&queued.seq);
        Some(queued)
    }

    /// Removes up to `max` events from the head.
    pub fn dequeue_batch(&mut self, max: usize) -> Vec<QueuedEvent> {
        let mut batch = Vec::with_capacity(max.min(self.len()));
        while batch.len() < max {
            match self.dequeue() {
                Some(queued) => batch.push(queued),
                None => break,
            }
        }
        batch
    }

    /// Peeks at the head without removing it.
    pub fn peek(&self) -> Option<&QueuedEvent> {
        self.by_order.values().next()
    }

    /// Peeks at the tail (lowest priority, latest inserted in that tier).
    pub fn peek_lowest(&self) -> Option<&QueuedEvent> {
        self.by_order.values().next_back()
    }

    /// Removes the tail.
    pub fn pop_lowest(&mut self) -> Option<QueuedEvent> {
        let (_, queued) = self.by_order.pop_last()?;
        self.by_insertion.remove(&queued.seq);
        Some(queued)
    }

    /// Removes the earliest-inserted event regardless of priority.
    fn pop_oldest(&mut self) -> Option<QueuedEvent> {
        let (seq, priority) = self.by_insertion.pop_first()?;
        self.by_order.remove(&(Reverse(priority), seq))
    }

    /// Removes everything, returning how many events were discarded.
    pub fn clear(&mut self) -> usize {
        let removed = self.len();
        self.by_order.clear();
        self.by_insertion.clear();
        removed
    }

    /// Queued events in dequeue order.
    pub fn snapshot(&self) -> Vec<&Event> {
        self.by_order.values().map(|queued| &queued.event).collect()
    }

    /// Records a fully successful fan-out.
    pub fn record_processed(&mut self, elapsed: Duration) {
        self.metrics.total_processed += 1;
        self.metrics.record_sample(elapsed);
    }

    /// Records a fan-out where at least one listener failed.
    pub fn record_failed(&mut self, elapsed: Duration) {
        self.metrics.total_failed += 1;
        self.metrics.record_sample(elapsed);
    }

    /// Records an event dropped outside `enqueue` (e.g. a blocked producer timing out).
    pub fn record_dropped(&mut self) {
        self.metrics.total_dropped += 1;
    }

    /// Current drain engine state.
    pub fn state(&self) -> ProcessingState {
        self.metrics.state
    }

    /// Updates the drain engine state.
    pub fn set_state(&mut self, state: ProcessingState) {
        self.metrics.state = state;
    }

    /// Returns a metrics snapshot.
    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            size: self.len(),
            capacity: self.config.max_size,
            peak_size: self.metrics.peak_size,
            total_enqueued: self.metrics.total_enqueued,
            total_processed: self.metrics.total_processed,
            total_dropped: self.metrics.total_dropped,
            total_failed: self.metrics.total_failed,
            average_processing_time: self.metrics.average(),
            processing_rate: self.metrics.processing_rate,
            state: self.metrics.state,
            backpressure_active: self.is_backpressure_active(),
        }
    }
}
