//! # AZ-02: Module Loader
//!
//! Dependency-ordered bootstrap of the AitherZero modules using Kahn's
//! topological sort. Modules at the same depth load in parallel on a
//! bounded worker pool; depth levels load strictly one after another.
//!
//! ## Architecture
//!
//! - **Domain**: Core entities (DependencyGraph, LoadPlan, ImportSummary)
//! - **Algorithms**: Graph building, Kahn's depth levels
//! - **Ports**: Inbound (ModuleLoaderApi) and Outbound (ModuleImporter, DependencySource)
//! - **Adapters**: `module.json` manifests, filesystem importer, static dependency source
//! - **Application**: Service orchestration with sequential and legacy fallbacks
//!
//! The logging module is special: it is loaded first, unconditionally, and
//! never takes part in the dependency graph.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use adapters::{
    FsModuleImporter, ManifestDependencySource, ModuleManifest, StaticDependencySource,
    MANIFEST_FILE,
};
pub use application::ModuleLoaderService;
pub use config::{LoaderConfig, DEFAULT_LOGGING_MODULE};
pub use domain::entities::*;
pub use domain::errors::LoaderError;
pub use ports::inbound::ModuleLoaderApi;
pub use ports::outbound::{DependencySource, ModuleImporter};
