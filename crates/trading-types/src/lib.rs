//! # Trading Types Crate
//!
//! Event data model shared by everything that talks to the event bus:
//! clock/tick sources, exchange connectors, strategies and risk modules.
//!
//! ## Design Principles
//!
//! - **Immutable once emitted**: an `Event` handed to the bus is never mutated
//!   in place. Status changes produce a new value via [`Event::with_status`].
//! - **Hierarchical types**: event types are dot-segmented strings
//!   (`"trade.update"`, `"market.price"`) so consumers can subscribe by pattern.
//! - **Ordered priorities**: [`EventPriority`] is totally ordered, higher is
//!   more urgent.

pub mod entities;

pub use entities::*;
