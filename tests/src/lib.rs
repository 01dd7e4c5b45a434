//! # Event Bus Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── queue_benchmarks.rs   # Enqueue/dequeue and dispatch throughput
//! │
//! └── src/integration/          # Cross-crate scenarios
//!     ├── properties.rs         # Ordering, overflow, matching, single-flight
//!     └── trading_flows.rs      # Market data → strategy → risk pipelines
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p bus-tests
//!
//! # By category
//! cargo test -p bus-tests integration::properties::
//! cargo test -p bus-tests integration::trading_flows::
//!
//! # Benchmarks
//! cargo bench -p bus-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
