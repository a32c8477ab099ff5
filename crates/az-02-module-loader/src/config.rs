//! Configuration for the module loader

use crate::domain::errors::LoaderError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Module always imported first, outside the dependency graph
pub const DEFAULT_LOGGING_MODULE: &str = "Logging";

/// Loader configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Worker pool size for multi-module depth levels
    pub max_parallel: usize,
    /// Load every level one module at a time
    pub legacy_mode: bool,
    /// Reload modules that are already loaded
    pub force: bool,
    pub logging_module: String,
    /// Root that descriptor paths are relative to
    pub modules_root: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_parallel: num_cpus::get(),
            legacy_mode: false,
            force: false,
            logging_module: DEFAULT_LOGGING_MODULE.to_string(),
            modules_root: PathBuf::from("modules"),
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.max_parallel == 0 {
            return Err(LoaderError::Config("max_parallel cannot be 0".into()));
        }
        if self.logging_module.trim().is_empty() {
            return Err(LoaderError::Config("logging_module cannot be empty".into()));
        }
        Ok(())
    }
}
