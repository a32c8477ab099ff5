//! Default importer: checks that a module is present on disk.

use crate::adapters::manifest::{ModuleManifest, MANIFEST_FILE};
use crate::domain::errors::LoaderError;
use crate::ports::outbound::ModuleImporter;
use shared_types::ModuleDescriptor;
use std::path::PathBuf;
use tracing::debug;

/// Verifies the module directory exists and its manifest parses.
#[derive(Clone, Debug)]
pub struct FsModuleImporter {
    root: PathBuf,
}

impl FsModuleImporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModuleImporter for FsModuleImporter {
    fn import(&self, descriptor: &ModuleDescriptor) -> Result<String, LoaderError> {
        let dir = self.root.join(&descriptor.path);
        if !dir.is_dir() {
            return Err(LoaderError::load(
                &descriptor.name,
                format!("module directory not found: {}", dir.display()),
            ));
        }

        let manifest = ModuleManifest::read(&descriptor.name, &dir)?.ok_or_else(|| {
            LoaderError::load(
                &descriptor.name,
                format!("{MANIFEST_FILE} not found in {}", dir.display()),
            )
        })?;
        if manifest.name != descriptor.name {
            return Err(LoaderError::load(
                &descriptor.name,
                format!("manifest declares module {}", manifest.name),
            ));
        }

        debug!(module = %descriptor.name, path = %dir.display(), "Module verified");
        Ok(match manifest.version {
            Some(version) => format!("Loaded {} v{version}", descriptor.name),
            None => format!("Loaded {}", descriptor.name),
        })
    }
}
