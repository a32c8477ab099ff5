//! Ports module for the module loader
//!
//! Defines inbound (API) and outbound (SPI) port traits.

pub mod inbound;
pub mod outbound;

pub use inbound::ModuleLoaderApi;
pub use outbound::{DependencySource, ModuleImporter};
