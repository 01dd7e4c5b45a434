//! # Dispatcher
//!
//! Owns the subscription registries and the priority queue, accepts events
//! from producers and drives the drain engine that fans them out.
//!
//! ## Flow
//!
//! ```text
//! producer ──emit_event()──► PriorityQueue ──drain──► resolve listeners ──► handle_event()
//!          │                 (overflow policy)        direct → routes → filtered
//!          └─emit_sync()────────────────────────────► resolve listeners ──► handle_event()
//! ```
//!
//! ## Concurrency
//!
//! `Dispatcher` is a cheap-clone handle. Registry and queue mutations are
//! serialized behind short, never-awaited locks. Listener fan-out is logically
//! concurrent (awaited together), not parallel mutation of dispatcher state.
//! A listener may emit back into the dispatcher: the single-flight flag
//! keeps that from starting a second drain.

mod drain;
mod registry;

pub use registry::{FilteredSubscription, Route};

use crate::config::{DispatcherConfig, OverflowStrategy};
use crate::diagnostics::{Diagnostic, DiagnosticsChannel, DropReason, RouteId, SubscriptionId};
use crate::error::BusError;
use crate::filter::EventFilter;
use crate::listener::{EventListener, ListenerId};
use crate::queue::{EnqueueOutcome, PriorityQueue, ProcessingState, QueueMetrics, QueuedEvent};
use drain::invoke_listener;
use futures::FutureExt;
use parking_lot::Mutex;
use registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio::time::{timeout, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use trading_types::{Event, EventStatus};

/// Shared dispatcher state.
pub(crate) struct Inner {
    config: DispatcherConfig,
    registry: Mutex<Registry>,
    queue: Mutex<PriorityQueue>,
    diagnostics: DiagnosticsChannel,
    /// Single-flight flag for the drain engine.
    draining: AtomicBool,
    paused: AtomicBool,
    backpressure_signalled: AtomicBool,
    /// Woken whenever a drain releases the flag.
    idle: Notify,
    /// Woken whenever queue capacity is freed.
    space: Notify,
}

impl Inner {
    fn try_acquire_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Releases the drain flag and settles the state.
    ///
    /// Both happen under the queue lock so a concurrent pause or resume sees
    /// either a running drain or a settled state, never a mix.
    fn finish_drain(&self) {
        {
            let mut queue = self.queue.lock();
            let settled = if self.paused.load(Ordering::Acquire) {
                ProcessingState::Paused
            } else {
                ProcessingState::Idle
            };
            queue.set_state(settled);
            self.draining.store(false, Ordering::Release);
        }
        self.idle.notify_waiters();
    }

    fn dequeue_next(&self) -> Option<QueuedEvent> {
        let (next, relieved) = {
            let mut queue = self.queue.lock();
            let next = queue.dequeue();
            (next, !queue.is_backpressure_active())
        };
        self.after_dequeue(relieved, next.is_some());
        next
    }

    fn dequeue_batch(&self, max: usize) -> Vec<QueuedEvent> {
        let (batch, relieved) = {
            let mut queue = self.queue.lock();
            let batch = queue.dequeue_batch(max);
            (batch, !queue.is_backpressure_active())
        };
        self.after_dequeue(relieved, !batch.is_empty());
        batch
    }

    fn after_dequeue(&self, relieved: bool, freed: bool) {
        if relieved {
            self.backpressure_signalled.store(false, Ordering::Release);
        }
        if freed {
            self.space.notify_waiters();
        }
    }

    fn publish_drop(&self, event: &Event, reason: DropReason) {
        warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            priority = %event.priority,
            reason = ?reason,
            "Event dropped"
        );
        self.diagnostics.publish(Diagnostic::EventDropped {
            event_id: event.id,
            event_type: event.event_type.clone(),
            priority: event.priority,
            reason,
        });
    }
}

/// Result of [`Dispatcher::emit_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReceipt {
    /// Events that entered the queue.
    pub accepted: usize,
    /// Events refused by the overflow policy.
    pub dropped: usize,
}

/// Priority-aware event dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// # Errors
    /// - `Configuration` if the config fails validation.
    pub fn new(config: DispatcherConfig) -> Result<Self, BusError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a dispatcher with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::build(DispatcherConfig::default())
    }

    fn build(config: DispatcherConfig) -> Self {
        let diagnostics = DiagnosticsChannel::new(config.diagnostics_capacity);
        let queue = PriorityQueue::new(config.queue.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(Registry::default()),
                queue: Mutex::new(queue),
                diagnostics,
                draining: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                backpressure_signalled: AtomicBool::new(false),
                idle: Notify::new(),
                space: Notify::new(),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Subscribe `listener` to the exact `event_type`.
    pub fn subscribe(&self, event_type: &str, listener: Arc<dyn EventListener>) {
        let name = listener.name().to_string();
        if self.inner.registry.lock().subscribe(event_type, listener) {
            debug!(event_type, listener = %name, "Listener added");
            self.inner.diagnostics.publish(Diagnostic::ListenerAdded {
                event_type: event_type.to_string(),
                listener: name,
            });
        }
    }

    /// Remove `listener_id` from `event_type`. No-op when absent.
    pub fn unsubscribe(&self, event_type: &str, listener_id: ListenerId) {
        let removed = self.inner.registry.lock().unsubscribe(event_type, listener_id);
        if let Some(name) = removed {
            debug!(event_type, listener = %name, "Listener removed");
            self.inner.diagnostics.publish(Diagnostic::ListenerRemoved {
                event_type: event_type.to_string(),
                listener: name,
            });
        }
    }

    /// Remove `listener_id` from the direct registry, every route and every
    /// filtered subscription. No-op when it is registered nowhere.
    pub fn unsubscribe_all(&self, listener_id: ListenerId) {
        let (name, types, routes, subscriptions) = {
            let mut registry = self.inner.registry.lock();
            let Some(listener) = registry.find(listener_id) else {
                return;
            };
            (
                listener.name().to_string(),
                registry.unsubscribe_direct_everywhere(listener_id),
                registry.remove_from_all_routes(listener_id),
                registry.remove_filtered_for(listener_id),
            )
        };

        for event_type in types {
            self.inner.diagnostics.publish(Diagnostic::ListenerRemoved {
                event_type,
                listener: name.clone(),
            });
        }
        for route_id in routes {
            self.inner
                .diagnostics
                .publish(Diagnostic::ListenerRemovedFromRoute {
                    route_id,
                    listener_id: listener_id.to_string(),
                });
        }
        for subscription_id in subscriptions {
            self.inner
                .diagnostics
                .publish(Diagnostic::FilteredSubscriptionRemoved { subscription_id });
        }
        debug!(listener = %name, "Listener unsubscribed everywhere");
    }

    /// Subscribe `listener` to every event accepted by `filter`.
    pub fn subscribe_with_filter(
        &self,
        filter: EventFilter,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionId {
        let name = listener.name().to_string();
        let subscription_id = self.inner.registry.lock().add_filtered(filter, listener);
        debug!(%subscription_id, listener = %name, "Filtered subscription added");
        self.inner
            .diagnostics
            .publish(Diagnostic::FilteredSubscriptionAdded {
                subscription_id,
                listener: name,
            });
        subscription_id
    }

    /// Subscribe `listener` to event types matching a glob `pattern`.
    pub fn subscribe_to_pattern(
        &self,
        pattern: &str,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionId {
        self.subscribe_with_filter(EventFilter::pattern(pattern), listener)
    }

    /// Remove a filtered subscription. No-op when absent.
    pub fn unsubscribe_filtered(&self, subscription_id: SubscriptionId) {
        if self.inner.registry.lock().remove_filtered(subscription_id) {
            debug!(%subscription_id, "Filtered subscription removed");
            self.inner
                .diagnostics
                .publish(Diagnostic::FilteredSubscriptionRemoved { subscription_id });
        }
    }

    // =========================================================================
    // ROUTES
    // =========================================================================

    /// Create an active, empty route. Higher `priority` routes resolve first.
    pub fn create_route(&self, filter: EventFilter, priority: i32) -> RouteId {
        let route_id = self.inner.registry.lock().create_route(filter, priority);
        debug!(%route_id, priority, "Route created");
        self.inner
            .diagnostics
            .publish(Diagnostic::RouteCreated { route_id, priority });
        route_id
    }

    /// Add `listener` to a route. Returns false if the route does not exist
    /// or already contains the listener.
    pub fn add_listener_to_route(&self, route_id: RouteId, listener: Arc<dyn EventListener>) -> bool {
        let name = listener.name().to_string();
        let added = self.inner.registry.lock().add_to_route(route_id, listener);
        if added {
            self.inner
                .diagnostics
                .publish(Diagnostic::ListenerAddedToRoute {
                    route_id,
                    listener: name,
                });
        }
        added
    }

    /// Remove `listener_id` from a route. No-op when absent.
    pub fn remove_listener_from_route(&self, route_id: RouteId, listener_id: ListenerId) {
        if self
            .inner
            .registry
            .lock()
            .remove_from_route(route_id, listener_id)
        {
            self.inner
                .diagnostics
                .publish(Diagnostic::ListenerRemovedFromRoute {
                    route_id,
                    listener_id: listener_id.to_string(),
                });
        }
    }

    /// Enable or disable a route. No-op when absent or unchanged.
    pub fn set_route_active(&self, route_id: RouteId, active: bool) {
        if self.inner.registry.lock().set_route_active(route_id, active) {
            debug!(%route_id, active, "Route active changed");
            self.inner
                .diagnostics
                .publish(Diagnostic::RouteActiveChanged { route_id, active });
        }
    }

    /// Delete a route. No-op when absent.
    pub fn remove_route(&self, route_id: RouteId) {
        if self.inner.registry.lock().remove_route(route_id) {
            debug!(%route_id, "Route removed");
            self.inner
                .diagnostics
                .publish(Diagnostic::RouteRemoved { route_id });
        }
    }

    /// A copy of the route, if it exists.
    pub fn route(&self, route_id: RouteId) -> Option<Route> {
        self.inner.registry.lock().route(route_id).cloned()
    }

    // =========================================================================
    // MATCHING & RESOLUTION
    // =========================================================================

    /// Whether `event` passes `filter`.
    #[must_use]
    pub fn matches_filter(event: &Event, filter: &EventFilter) -> bool {
        filter.matches(event)
    }

    /// Listeners that would receive `event` right now, in delivery order.
    pub fn resolve_listeners(&self, event: &Event) -> Vec<Arc<dyn EventListener>> {
        self.inner.registry.lock().resolve(event)
    }

    /// Whether any listener currently resolves for `event`.
    pub fn has_listeners(&self, event: &Event) -> bool {
        self.inner.registry.lock().has_listeners(event)
    }

    /// Number of direct listeners for the exact `event_type`.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner.registry.lock().listener_count(event_type)
    }

    /// Number of routes.
    pub fn route_count(&self) -> usize {
        self.inner.registry.lock().route_count()
    }

    /// Number of filtered subscriptions.
    pub fn filtered_subscription_count(&self) -> usize {
        self.inner.registry.lock().filtered_count()
    }

    // =========================================================================
    // EMISSION
    // =========================================================================

    /// Queue `event` for delivery and make sure a drain is running.
    ///
    /// Returns whether any listener resolves for the event at call time,
    /// independent of whether it was accepted or when it is processed.
    ///
    /// # Errors
    /// - `QueueOverflow` when full under `OverflowStrategy::Reject`.
    pub async fn emit_event(&self, event: Event) -> Result<bool, BusError> {
        let has_listeners = self.has_listeners(&event);
        if self.enqueue(event, true).await? {
            self.start_drain();
        }
        Ok(has_listeners)
    }

    /// Deliver `event` immediately, bypassing the queue.
    ///
    /// Listeners that complete synchronously run before this returns; the
    /// rest continue on the current Tokio runtime without being awaited.
    /// Returns whether any listener matched.
    pub fn emit_sync(&self, event: Event) -> bool {
        let listeners = self.resolve_listeners(&event);
        if listeners.is_empty() {
            return false;
        }

        let event = Arc::new(event.with_status(EventStatus::Processing));
        for listener in listeners {
            let diagnostics = self.inner.diagnostics.clone();
            let event = Arc::clone(&event);
            let mut invocation = Box::pin(async move {
                invoke_listener(&diagnostics, &listener, &event).await;
            });

            if invocation.as_mut().now_or_never().is_some() {
                continue;
            }
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(invocation);
                }
                Err(_) => warn!("No Tokio runtime; pending listener completion abandoned"),
            }
        }
        true
    }

    /// Queue several events, each independently subject to the overflow policy.
    ///
    /// Publishes one aggregate `BatchDropped` diagnostic if any were refused.
    ///
    /// # Errors
    /// - `QueueOverflow` under `OverflowStrategy::Reject` if any event hit a
    ///   full queue. The rest of the batch is still attempted and accepted
    ///   events are still drained.
    pub async fn emit_batch(&self, events: Vec<Event>) -> Result<BatchReceipt, BusError> {
        let total = events.len();
        let mut accepted = 0;
        let mut overflow = None;

        for event in events {
            match self.enqueue(event, false).await {
                Ok(true) => accepted += 1,
                Ok(false) => {}
                Err(err) => {
                    overflow.get_or_insert(err);
                }
            }
        }

        let dropped = total - accepted;
        if dropped > 0 {
            warn!(dropped, total, "Batch partially dropped");
            self.inner
                .diagnostics
                .publish(Diagnostic::BatchDropped { dropped, total });
        }
        if accepted > 0 {
            self.start_drain();
        }

        match overflow {
            Some(err) => Err(err),
            None => Ok(BatchReceipt { accepted, dropped }),
        }
    }

    /// Enqueue with overflow handling. Returns whether the event was accepted.
    async fn enqueue(&self, event: Event, report_rejection: bool) -> Result<bool, BusError> {
        let outcome = self.inner.queue.lock().enqueue(event)?;
        match outcome {
            EnqueueOutcome::Accepted => {}
            EnqueueOutcome::Evicted(evicted) => {
                self.inner.publish_drop(&evicted.event, DropReason::Evicted);
            }
            EnqueueOutcome::Rejected(event) => {
                if self.inner.config.queue.overflow_strategy == OverflowStrategy::Block {
                    return self.wait_for_space(event, report_rejection).await;
                }
                if report_rejection {
                    self.inner.publish_drop(&event, DropReason::Rejected);
                }
                return Ok(false);
            }
        }
        self.check_backpressure();
        Ok(true)
    }

    /// `BLOCK` strategy: wait for the drain to free capacity, bounded by
    /// `block_timeout` so a listener emitting into its own full queue cannot
    /// deadlock the drain it is running under.
    async fn wait_for_space(&self, mut event: Event, report_rejection: bool) -> Result<bool, BusError> {
        let deadline = Instant::now() + self.inner.config.block_timeout;

        loop {
            let notified = self.inner.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let outcome = self.inner.queue.lock().enqueue(event)?;
            match outcome {
                EnqueueOutcome::Rejected(refused) => event = refused,
                EnqueueOutcome::Accepted | EnqueueOutcome::Evicted(_) => {
                    self.check_backpressure();
                    return Ok(true);
                }
            }

            self.start_drain();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, notified).await.is_err() {
                self.inner.queue.lock().record_dropped();
                if report_rejection {
                    self.inner.publish_drop(&event, DropReason::BlockTimeout);
                }
                return Ok(false);
            }
        }
    }

    fn check_backpressure(&self) {
        let (active, queue_size, capacity) = {
            let queue = self.inner.queue.lock();
            (queue.is_backpressure_active(), queue.len(), queue.capacity())
        };
        if active && !self.inner.backpressure_signalled.swap(true, Ordering::AcqRel) {
            warn!(queue_size, capacity, "Backpressure threshold reached");
            self.inner.diagnostics.publish(Diagnostic::Backpressure {
                queue_size,
                capacity,
            });
        }
    }

    fn start_drain(&self) {
        if self.inner.try_acquire_drain() {
            tokio::spawn(drain::run(
                Arc::clone(&self.inner),
                ProcessingState::Processing,
            ));
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Mark processing as paused. An in-flight drain is not interrupted; the
    /// state settles to `Paused` when it goes idle. A new emission or
    /// [`resume_processing`](Self::resume_processing) continues draining.
    pub fn pause_processing(&self) {
        self.inner.paused.store(true, Ordering::Release);
        {
            let mut queue = self.inner.queue.lock();
            if !self.inner.is_draining() {
                queue.set_state(ProcessingState::Paused);
            }
        }
        info!("Event processing paused");
    }

    /// Clear the pause flag and drain anything pending.
    pub fn resume_processing(&self) {
        self.inner.paused.store(false, Ordering::Release);
        let pending = {
            let mut queue = self.inner.queue.lock();
            if !self.inner.is_draining() {
                queue.set_state(ProcessingState::Idle);
            }
            !queue.is_empty()
        };
        info!("Event processing resumed");
        if pending {
            self.start_drain();
        }
    }

    /// Process until the queue is empty, regardless of backpressure or pause.
    ///
    /// Runs the drain inline when none is active, otherwise waits for the
    /// active one to finish.
    pub async fn drain_queue(&self) {
        loop {
            if self.inner.try_acquire_drain() {
                drain::run(Arc::clone(&self.inner), ProcessingState::Draining).await;
            } else {
                let idle = self.inner.idle.notified();
                tokio::pin!(idle);
                idle.as_mut().enable();
                if self.inner.is_draining() {
                    idle.await;
                }
            }

            if self.inner.queue.lock().is_empty() && !self.inner.is_draining() {
                break;
            }
        }
    }

    /// Clear the queue and every registry. After this nothing can be
    /// delivered since nothing is left to match.
    pub fn dispose(&self) {
        let discarded = {
            let mut registry = self.inner.registry.lock();
            let mut queue = self.inner.queue.lock();
            registry.clear();
            queue.clear()
        };
        self.inner
            .backpressure_signalled
            .store(false, Ordering::Release);
        self.inner.space.notify_waiters();
        info!(discarded, "Dispatcher disposed");
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Number of queued events.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Queue metrics snapshot.
    pub fn metrics(&self) -> QueueMetrics {
        self.inner.queue.lock().metrics()
    }

    /// Current drain engine state.
    pub fn processing_state(&self) -> ProcessingState {
        self.inner.queue.lock().state()
    }

    /// Whether a drain loop is running.
    pub fn is_draining(&self) -> bool {
        self.inner.is_draining()
    }

    /// Whether the queue is at or above its backpressure threshold.
    pub fn is_backpressure_active(&self) -> bool {
        self.inner.queue.lock().is_backpressure_active()
    }

    /// Subscribe to diagnostics published from now on.
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.diagnostics.subscribe()
    }

    /// Diagnostics as a stream.
    pub fn diagnostic_stream(&self) -> BroadcastStream<Diagnostic> {
        self.inner.diagnostics.stream()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_defaults()
    }
}
