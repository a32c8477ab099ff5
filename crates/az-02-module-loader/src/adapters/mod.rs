//! Adapters for the loader's outbound ports

pub mod fs_importer;
pub mod manifest;
pub mod static_source;

pub use fs_importer::FsModuleImporter;
pub use manifest::{ManifestDependencySource, ModuleManifest, MANIFEST_FILE};
pub use static_source::StaticDependencySource;
