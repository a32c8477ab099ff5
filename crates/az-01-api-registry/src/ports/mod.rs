//! Ports implemented by the modules that register APIs.

pub mod outbound;

pub use outbound::ApiHandler;
