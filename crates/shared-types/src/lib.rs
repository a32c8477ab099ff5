//! # Shared Types Crate
//!
//! Entities that cross crate boundaries in the communication core:
//! message priority, event provenance, and the module descriptors consumed by
//! the loader.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Types used by more than one crate live here.
//! - **Plain Data**: Everything is `Clone` + serde so it can be recorded in
//!   history buffers, exported, and logged.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
