//! AitherZero communication hub.

use anyhow::Result;
use az_02_module_loader::{
    FsModuleImporter, ImportSummary, LoadStatus, ManifestDependencySource, ModuleLoaderApi,
    ModuleLoaderService,
};
use hub_runtime::{default_modules, CommunicationHub, HubConfig, LOG_LEVEL_VAR};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| "info".into()))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn bootstrap_modules(config: &HubConfig) -> Result<ImportSummary> {
    let root = config.loader.modules_root.clone();
    let loader = ModuleLoaderService::new(
        config.loader.clone(),
        Arc::new(FsModuleImporter::new(&root)),
        Arc::new(ManifestDependencySource::new(&root)),
    )?;

    let descriptors = default_modules();
    let summary =
        tokio::task::spawn_blocking(move || loader.import_modules(&descriptors)).await??;

    for detail in summary.details.iter().filter(|d| d.status != LoadStatus::Success) {
        warn!(module = %detail.name, status = ?detail.status, message = %detail.message, "Module not loaded");
    }
    Ok(summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_tracing()?;

    // Load configuration
    let config = HubConfig::from_env();
    info!(modules_root = %config.loader.modules_root.display(), "Starting AitherZero hub");

    let summary = bootstrap_modules(&config).await?;
    if !summary.failed_required.is_empty() {
        warn!(modules = ?summary.failed_required, "Starting hub without all required modules");
    }

    let hub = CommunicationHub::new(config)?;
    let report = hub.test_communication().await;
    if !report.success {
        warn!("Hub running with a failed self-test");
    }
    info!(status = %serde_json::to_string(&hub.status())?, "Hub status");

    info!("Hub is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    hub.close().await;
    Ok(())
}
