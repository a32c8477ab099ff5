//! `module.json` manifests and the dependency source that reads them.

use crate::domain::errors::LoaderError;
use crate::ports::outbound::DependencySource;
use serde::{Deserialize, Serialize};
use shared_types::ModuleDescriptor;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Manifest file name inside each module directory.
pub const MANIFEST_FILE: &str = "module.json";

/// On-disk module metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required_modules: Vec<String>,
}

impl ModuleManifest {
    /// Read `dir/module.json`. `Ok(None)` when the file does not exist.
    pub fn read(module: &str, dir: &Path) -> Result<Option<Self>, LoaderError> {
        let path = dir.join(MANIFEST_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LoaderError::Manifest {
                    module: module.to_string(),
                    reason: format!("{}: {e}", path.display()),
                })
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| LoaderError::Manifest {
                module: module.to_string(),
                reason: format!("{}: {e}", path.display()),
            })
    }
}

/// Reads `requiredModules` from each module's manifest under `root`.
///
/// A module without a manifest has no dependencies.
#[derive(Clone, Debug)]
pub struct ManifestDependencySource {
    root: PathBuf,
}

impl ManifestDependencySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DependencySource for ManifestDependencySource {
    fn dependencies(&self, descriptor: &ModuleDescriptor) -> Result<Vec<String>, LoaderError> {
        let dir = self.root.join(&descriptor.path);
        Ok(ModuleManifest::read(&descriptor.name, &dir)?
            .map(|m| m.required_modules)
            .unwrap_or_default())
    }
}
