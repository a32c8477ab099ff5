//! Inbound Ports (Driving Ports / API)

use crate::domain::entities::{ImportSummary, LoadPlan, LoadedModule, LoaderState};
use crate::domain::errors::LoaderError;
use shared_types::ModuleDescriptor;

/// Primary module loader API
///
/// Loading blocks the calling thread; async callers should run it on a
/// blocking thread.
pub trait ModuleLoaderApi: Send + Sync {
    /// Load `descriptors` in dependency order.
    ///
    /// Per-module failures are reported in the summary. An error means both
    /// the ordered strategy and the legacy fallback failed.
    fn import_modules(&self, descriptors: &[ModuleDescriptor])
        -> Result<ImportSummary, LoaderError>;

    /// Compute depth levels without loading anything.
    fn plan(&self, descriptors: &[ModuleDescriptor]) -> Result<LoadPlan, LoaderError>;

    fn state(&self) -> LoaderState;

    fn loaded_modules(&self) -> Vec<LoadedModule>;
}
