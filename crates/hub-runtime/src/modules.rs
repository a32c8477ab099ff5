//! The module set bootstrapped at startup.
//!
//! Paths are relative to `LoaderConfig::modules_root`. Ordering comes from
//! each module's manifest, not from this list.

use shared_types::ModuleDescriptor;

const DEFAULT_MODULES: &[(&str, &str, bool)] = &[
    ("Logging", "Centralized logging", true),
    ("ConfigurationCore", "Configuration store and environments", true),
    ("ModuleCommunication", "Message bus and API registry bindings", true),
    ("ParallelExecution", "Runspace-based parallel task execution", false),
    ("TestingFramework", "Test discovery and execution", false),
    ("SecureCredentials", "Credential storage", false),
    ("RemoteConnection", "Remote session management", false),
    ("ScriptManager", "Script repository and templates", false),
    ("BackupManager", "Backup and cleanup operations", false),
    ("PatchManager", "Patch and pull request workflow", false),
    ("DevEnvironment", "Developer environment setup", false),
    ("OpenTofuProvider", "OpenTofu infrastructure deployment", false),
    ("LabRunner", "Lab automation orchestration", false),
    ("ISOManager", "ISO download and inventory", false),
    ("SystemMonitoring", "Host and service monitoring", false),
    ("SetupWizard", "First-run setup", false),
];

/// Descriptors for every module shipped with the framework.
pub fn default_modules() -> Vec<ModuleDescriptor> {
    DEFAULT_MODULES
        .iter()
        .map(|(name, description, required)| {
            let descriptor = ModuleDescriptor::new(*name, *name).with_description(*description);
            if *required {
                descriptor.required()
            } else {
                descriptor
            }
        })
        .collect()
}
