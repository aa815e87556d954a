//! # Event Bus Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/      # End-to-end bus scenarios
//!     ├── delivery.rs     # Ordering, patterns, filters, round trips
//!     ├── lifecycle.rs    # Expiry, capacity, unsubscribe, sweep
//!     ├── errors.rs       # Error policy, timeouts, system.error
//!     └── telemetry.rs    # Stats and Prometheus export
//!
//! tests/benches/
//! └── dispatch_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p event-bus-tests
//!
//! # By category
//! cargo test -p event-bus-tests integration::delivery::
//! cargo test -p event-bus-tests integration::errors::
//!
//! # Benchmarks
//! cargo bench -p event-bus-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]
