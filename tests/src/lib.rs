//! # AitherZero Test Suite
//!
//! Cross-crate flows exercising the bus, the API registry, the loader, and
//! the hub that ties them together.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── bus_flows.rs      # Channels, FIFO, TTL, queue bound, export
//!     ├── api_flows.rs      # Retry/backoff, circuit breaker, security
//!     └── loader_flows.rs   # Depth ordering, cycles, hub bootstrap
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p az-tests
//! cargo test -p az-tests integration::loader_flows::
//! ```

pub mod integration;
