//! # Diagnostics
//!
//! Side-channel signals emitted by the dispatcher. Nothing inside the bus
//! consumes them and their absence never affects delivery.
//!
//! Uses `tokio::sync::broadcast`: publishing with no receivers is a no-op and
//! slow receivers lag rather than blocking the dispatcher.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;
use trading_types::{EventId, EventPriority};

/// Identifier of a filtered subscription.
pub type SubscriptionId = uuid::Uuid;

/// Identifier of a route.
pub type RouteId = uuid::Uuid;

/// Observational signals published by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Listener added to the direct registry.
    ListenerAdded {
        event_type: String,
        listener: String,
    },
    /// Listener removed from the direct registry.
    ListenerRemoved {
        event_type: String,
        listener: String,
    },
    /// Filtered subscription created.
    FilteredSubscriptionAdded {
        subscription_id: SubscriptionId,
        listener: String,
    },
    /// Filtered subscription removed.
    FilteredSubscriptionRemoved { subscription_id: SubscriptionId },
    /// Route created.
    RouteCreated { route_id: RouteId, priority: i32 },
    /// Route removed.
    RouteRemoved { route_id: RouteId },
    /// Route enabled or disabled.
    RouteActiveChanged { route_id: RouteId, active: bool },
    /// Listener joined a route.
    ListenerAddedToRoute { route_id: RouteId, listener: String },
    /// Listener left a route.
    ListenerRemovedFromRoute {
        route_id: RouteId,
        listener_id: String,
    },
    /// Queue occupancy at or above the backpressure threshold.
    Backpressure { queue_size: usize, capacity: usize },
    /// A single event was rejected or evicted by the overflow policy.
    EventDropped {
        event_id: EventId,
        event_type: String,
        priority: EventPriority,
        reason: DropReason,
    },
    /// Some events of a batch emission were rejected.
    BatchDropped { dropped: usize, total: usize },
    /// A batched drain unit finished.
    BatchProcessed { size: usize, elapsed: Duration },
    /// An event took longer than the configured processing threshold.
    SlowProcessing {
        event_id: EventId,
        event_type: String,
        elapsed: Duration,
        threshold: Duration,
    },
    /// The drain loop itself failed.
    ProcessingError { message: String },
    /// A listener failed and had no error hook of its own.
    ListenerFailed {
        event_id: EventId,
        listener: String,
        error: String,
    },
}

/// Why an event never reached its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Refused at a full queue.
    Rejected,
    /// Evicted to make room for another event.
    Evicted,
    /// Producer gave up waiting under the `BLOCK` strategy.
    BlockTimeout,
}

/// Publishing side of the diagnostics channel.
#[derive(Debug, Clone)]
pub struct DiagnosticsChannel {
    sender: broadcast::Sender<Diagnostic>,
}

impl DiagnosticsChannel {
    /// Create a channel buffering up to `capacity` signals per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a signal. Missing receivers are ignored.
    pub fn publish(&self, diagnostic: Diagnostic) {
        if self.sender.send(diagnostic).is_err() {
            trace!("Diagnostic dropped (no receivers)");
        }
    }

    /// New receiver seeing signals published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.sender.subscribe()
    }

    /// Stream of signals, for use with stream combinators.
    pub fn stream(&self) -> BroadcastStream<Diagnostic> {
        BroadcastStream::new(self.subscribe())
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
