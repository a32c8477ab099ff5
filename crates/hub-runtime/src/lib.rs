//! # Hub Runtime
//!
//! Wires the communication core together: the message bus and API registry
//! owned by a [`CommunicationHub`], the configuration layer, and the module
//! set bootstrapped through the loader.
//!
//! ## Startup
//!
//! 1. Install the tracing subscriber
//! 2. Read [`HubConfig`] from the environment
//! 3. Load the module set in dependency order (blocking thread)
//! 4. Create the hub and run its self-test
//! 5. Serve until Ctrl+C, then drain the bus

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod hub;
pub mod modules;
pub mod status;

pub use config::{HubConfig, LOG_LEVEL_VAR};
pub use hub::{CommunicationHub, HubError, HUB_MODULE, SYSTEM_CHANNEL};
pub use modules::default_modules;
pub use status::{CommunicationMetrics, CommunicationStatus, CommunicationTestReport, ProbeResult};
