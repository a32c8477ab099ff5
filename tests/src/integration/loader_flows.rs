//! # Module Loader Flows
//!
//! Bootstraps module trees laid out on disk with `module.json` manifests and
//! checks the resulting order, then hands the loaded set to a running hub.

#[cfg(test)]
mod tests {
    use az_02_module_loader::{
        FsModuleImporter, LoadStatus, LoaderConfig, LoaderState, ManifestDependencySource,
        ModuleLoaderApi, ModuleLoaderService, ModuleManifest, MANIFEST_FILE,
    };
    use hub_runtime::{default_modules, CommunicationHub, HubConfig};
    use parking_lot::Mutex;
    use serde_json::json;
    use shared_bus::{BusConfig, BusMessage, EventOptions};
    use shared_types::{EventSource, ModuleDescriptor};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn write_module(root: &Path, name: &str, requires: &[&str]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let manifest = ModuleManifest {
            name: name.to_string(),
            version: Some("1.0.0".into()),
            description: None,
            required_modules: requires.iter().map(|r| r.to_string()).collect(),
        };
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
    }

    fn loader(root: &Path, max_parallel: usize) -> ModuleLoaderService {
        ModuleLoaderService::new(
            LoaderConfig {
                max_parallel,
                modules_root: root.to_path_buf(),
                ..LoaderConfig::default()
            },
            Arc::new(FsModuleImporter::new(root)),
            Arc::new(ManifestDependencySource::new(root)),
        )
        .unwrap()
    }

    fn descriptors(names: &[&str]) -> Vec<ModuleDescriptor> {
        names.iter().map(|n| ModuleDescriptor::new(*n, *n)).collect()
    }

    /// Logging, then the diamond A <- {B, C} <- D.
    fn diamond(root: &Path) {
        write_module(root, "Logging", &[]);
        write_module(root, "A", &["Logging"]);
        write_module(root, "B", &["A"]);
        write_module(root, "C", &["A", "Logging"]);
        write_module(root, "D", &["B", "C"]);
    }

    // =============================================================================
    // ORDERING
    // =============================================================================

    #[test]
    fn test_diamond_depths_and_order() {
        let root = TempDir::new().unwrap();
        diamond(root.path());
        let loader = loader(root.path(), 4);
        let modules = descriptors(&["D", "C", "Logging", "B", "A"]);

        let plan = loader.plan(&modules).unwrap();
        assert_eq!(plan.logging_module.as_deref(), Some("Logging"));
        assert_eq!(plan.depth("A"), Some(0));
        assert_eq!(plan.depth("B"), Some(1));
        assert_eq!(plan.depth("C"), Some(1));
        assert_eq!(plan.depth("D"), Some(2));
        assert_eq!(loader.state(), LoaderState::NotStarted);

        let summary = loader.import_modules(&modules).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.imported_count, 5);
        assert_eq!(summary.load_order[0], "Logging");

        let pos = |name| summary.position(name).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(pos("A") < pos("C"));
        assert!(pos("D") > pos("B"));
        assert!(pos("D") > pos("C"));
        assert_eq!(summary.parallel_groups, vec![vec!["B".to_string(), "C".to_string()]]);
        assert_eq!(
            summary.detail("D").unwrap().message,
            "Loaded D v1.0.0"
        );
        assert_eq!(loader.state(), LoaderState::Complete);
        assert_eq!(loader.loaded_modules().len(), 5);
    }

    #[test]
    fn test_sequential_pool_keeps_order() {
        let root = TempDir::new().unwrap();
        diamond(root.path());
        let loader = loader(root.path(), 1);

        let summary = loader
            .import_modules(&descriptors(&["D", "C", "Logging", "B", "A"]))
            .unwrap();
        assert_eq!(summary.load_order, vec!["Logging", "A", "B", "C", "D"]);
    }

    // =============================================================================
    // FAILURES
    // =============================================================================

    #[test]
    fn test_cycle_does_not_block_unrelated_modules() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "X", &["Y"]);
        write_module(root.path(), "Y", &["X"]);
        write_module(root.path(), "W", &["X"]);
        write_module(root.path(), "Z", &[]);
        let loader = loader(root.path(), 4);
        let modules = descriptors(&["X", "Y", "W", "Z"]);

        let plan = loader.plan(&modules).unwrap();
        assert!(plan.has_cycles());
        assert_eq!(plan.depth("Z"), Some(0));

        let summary = loader.import_modules(&modules).unwrap();
        assert_eq!(summary.detail("Z").unwrap().status, LoadStatus::Success);
        for name in ["X", "Y", "W"] {
            let detail = summary.detail(name).unwrap();
            assert_eq!(detail.status, LoadStatus::Skipped);
            assert!(detail.message.contains("Circular dependency"));
        }
        assert_eq!(summary.skipped_count, 3);
        assert!(summary.position("X").is_none());
        assert_eq!(loader.state(), LoaderState::Complete);
    }

    #[test]
    fn test_missing_modules_fail_in_isolation() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "Logging", &[]);
        write_module(root.path(), "LabRunner", &["OpenTofuProvider"]);
        // OpenTofuProvider is listed but absent on disk.
        let modules = vec![
            ModuleDescriptor::new("Logging", "Logging").required(),
            ModuleDescriptor::new("OpenTofuProvider", "OpenTofuProvider").required(),
            ModuleDescriptor::new("LabRunner", "LabRunner"),
        ];

        let summary = loader(root.path(), 2).import_modules(&modules).unwrap();
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.failed_required, vec!["OpenTofuProvider".to_string()]);
        // Dependents of a failed module are still attempted.
        assert_eq!(summary.detail("LabRunner").unwrap().status, LoadStatus::Success);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_default_modules_against_empty_root() {
        let root = TempDir::new().unwrap();
        let summary = loader(root.path(), 4)
            .import_modules(&default_modules())
            .unwrap();

        assert_eq!(summary.imported_count, 0);
        assert_eq!(summary.failed_count, default_modules().len());
        let mut required = summary.failed_required.clone();
        required.sort();
        assert_eq!(required, vec!["ConfigurationCore", "Logging", "ModuleCommunication"]);
    }

    // =============================================================================
    // BOOTSTRAP INTO THE HUB
    // =============================================================================

    #[tokio::test]
    async fn test_bootstrap_then_announce_on_hub() {
        let root = TempDir::new().unwrap();
        diamond(root.path());
        let service = loader(root.path(), 4);
        let modules = descriptors(&["A", "B", "C", "D", "Logging"]);
        let summary = tokio::task::spawn_blocking(move || service.import_modules(&modules))
            .await
            .unwrap()
            .unwrap();

        let hub = CommunicationHub::new(HubConfig {
            bus: BusConfig {
                dispatch_workers: 1,
                ..BusConfig::default()
            },
            ..HubConfig::default()
        })
        .unwrap();

        let announced = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&announced);
        hub.bus()
            .subscribe_fn("Modules", "Event:ModuleLoaded", "SetupWizard", move |m: &BusMessage| {
                sink.lock().push(m.data["data"]["name"].clone());
                Ok(())
            });

        let source = EventSource {
            module: "ModuleLoader".into(),
            ..EventSource::default()
        };
        for name in &summary.load_order {
            hub.bus()
                .publish_event(
                    "ModuleLoaded",
                    json!({ "name": name }),
                    EventOptions::on_channel("Modules").source(source.clone()),
                )
                .unwrap();
        }
        hub.bus().flush().await;

        let expected: Vec<_> = summary.load_order.iter().map(|n| json!(n)).collect();
        assert_eq!(*announced.lock(), expected);
        assert!(hub.test_communication().await.success);

        let status = hub.status();
        assert_eq!(status.history_size, summary.load_order.len());
        hub.close().await;
    }
}
