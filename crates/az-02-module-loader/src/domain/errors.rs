//! Error types for the module loader

use thiserror::Error;

/// All errors that can occur while planning or loading modules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    /// Modules that could not be placed at any depth
    #[error("Circular dependency involving: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// A single module failed to import
    #[error("Failed to load module {module}: {reason}")]
    ModuleLoad { module: String, reason: String },

    /// Module manifest exists but cannot be read or parsed
    #[error("Invalid manifest for module {module}: {reason}")]
    Manifest { module: String, reason: String },

    /// Descriptor list is unusable as a whole
    #[error("Invalid module descriptor: {0}")]
    InvalidDescriptor(String),

    /// The worker pool could not be built or failed while running a level
    #[error("Parallel loading unavailable: {0}")]
    PoolUnavailable(String),

    /// Invalid loader configuration
    #[error("Invalid loader configuration: {0}")]
    Config(String),
}

impl LoaderError {
    pub fn load(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleLoad {
            module: module.into(),
            reason: reason.into(),
        }
    }
}
