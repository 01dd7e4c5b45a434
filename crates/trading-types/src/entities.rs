//! # Core Event Entities
//!
//! Defines the event record that flows through the bus, together with its
//! identity, priority and lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Source reported for events that carry no origin.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Milliseconds since the UNIX epoch.
pub type Timestamp = u64;

/// Returns the current wall-clock time in milliseconds since the UNIX epoch.
#[must_use]
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event urgency. Higher variants are dequeued first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPriority {
    /// Background work (candle aggregation, housekeeping).
    Low,
    /// Regular market data.
    #[default]
    Normal,
    /// Order lifecycle updates.
    High,
    /// Risk breaches and anything that must jump the queue.
    Critical,
}

impl EventPriority {
    /// All priorities from least to most urgent.
    pub const ALL: [EventPriority; 4] = [Self::Low, Self::Normal, Self::High, Self::Critical];
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Created, not yet picked up by a drain.
    #[default]
    Pending,
    /// Being fanned out to listeners.
    Processing,
    /// Every listener handled the event.
    Completed,
    /// At least one listener failed.
    Failed,
}

/// An event flowing through the bus.
///
/// Producers build events with the builder-style constructors and hand them
/// to the dispatcher. Once emitted, an event is only ever read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier.
    pub id: EventId,
    /// Dot-segmented hierarchical type, e.g. `"trade.update"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Queue ordering priority.
    pub priority: EventPriority,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Optional origin identifier (connector name, strategy id...).
    pub source: Option<String>,
    /// Creation time in milliseconds since the UNIX epoch.
    pub timestamp: Timestamp,
    /// Producer-defined data.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a pending event of the given type with `Normal` priority.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            priority: EventPriority::default(),
            status: EventStatus::Pending,
            source: None,
            timestamp: now_millis(),
            payload: serde_json::Value::Null,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the origin identifier.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach producer data.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Return a copy of this event carrying a different status.
    #[must_use]
    pub fn with_status(&self, status: EventStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// The origin, or [`UNKNOWN_SOURCE`] when absent.
    #[must_use]
    pub fn resolved_source(&self) -> &str {
        self.source.as_deref().unwrap_or(UNKNOWN_SOURCE)
    }
}
