//! Domain layer for the module loader

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
