//! # Event Bus - Priority-Aware Dispatch for Trading Components
//!
//! In-process publish/subscribe bus connecting market-data connectors,
//! strategies, order managers and risk modules.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐  emit_event()  ┌───────────────┐  drain  ┌─────────────────┐
//! │  Producers   │ ─────────────► │ PriorityQueue │ ──────► │ Listener fan-out│
//! │ (connectors, │                │  (overflow +  │         │ direct → routes │
//! │  strategies) │  emit_sync()   │  backpressure)│         │   → filtered    │
//! │              │ ───────────────┼───────────────┼───────► │                 │
//! └──────────────┘                └───────────────┘         └─────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Priority ordering:** higher priority first, FIFO within a priority.
//! - **Bounded memory:** the queue never exceeds its capacity; the overflow
//!   strategy decides what is lost.
//! - **Failure isolation:** a listener error or panic never reaches the
//!   emitter and never stops other listeners.
//! - **Single-flight drain:** at most one drain loop per dispatcher.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod listener;
pub mod queue;

// Re-export main types
pub use config::{DispatcherConfig, OverflowStrategy, ProcessingMode, QueueConfig};
pub use diagnostics::{Diagnostic, DiagnosticsChannel, DropReason, RouteId, SubscriptionId};
pub use dispatcher::{BatchReceipt, Dispatcher, FilteredSubscription, Route};
pub use error::{BusError, ConfigError, ListenerError};
pub use filter::{glob_match, EventFilter, EventPredicate};
pub use listener::{
    ErrorHook, EventListener, FnListener, ListenerId, ListenerState, SourceAwareListener,
};
pub use queue::{EnqueueOutcome, PriorityQueue, ProcessingState, QueueMetrics, QueuedEvent};
pub use trading_types::{Event, EventId, EventPriority, EventStatus};

/// Default queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Default fraction of capacity at which backpressure is signalled.
pub const DEFAULT_BACKPRESSURE_THRESHOLD: f64 = 0.8;

/// Default number of events per unit in batched mode.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default buffer of the diagnostics broadcast channel.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 1024;
