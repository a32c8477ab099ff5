//! Outbound Ports (Driven Ports / SPI)

use crate::domain::errors::LoaderError;
use shared_types::ModuleDescriptor;

/// Imports a single module.
///
/// Called from worker threads. Closures
/// `Fn(&ModuleDescriptor) -> Result<String, LoaderError>` implement this
/// directly.
pub trait ModuleImporter: Send + Sync {
    /// Returns a short status message on success.
    fn import(&self, descriptor: &ModuleDescriptor) -> Result<String, LoaderError>;
}

impl<F> ModuleImporter for F
where
    F: Fn(&ModuleDescriptor) -> Result<String, LoaderError> + Send + Sync,
{
    fn import(&self, descriptor: &ModuleDescriptor) -> Result<String, LoaderError> {
        (self)(descriptor)
    }
}

/// Declared dependencies of a module.
pub trait DependencySource: Send + Sync {
    fn dependencies(&self, descriptor: &ModuleDescriptor) -> Result<Vec<String>, LoaderError>;
}
