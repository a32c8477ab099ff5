//! Module Loader Service
//!
//! Orchestrates a bootstrap run:
//! 1. Validate descriptors
//! 2. Build the dependency graph (logging module excluded)
//! 3. Sort into depth levels with Kahn's algorithm
//! 4. Load the logging module, then each level in ascending order
//! 5. Report circular modules as skipped
//!
//! Two fallbacks keep a run alive: a level whose parallel dispatch fails is
//! reloaded sequentially, and a run whose ordered strategy fails is retried
//! once with the legacy loader (declared order, no dependency resolution).

use crate::algorithms::{build_dependency_graph, kahns_depth_levels, validate_descriptors};
use crate::config::LoaderConfig;
use crate::domain::entities::{
    ImportSummary, LoadPlan, LoadStatus, LoadStrategy, LoadedModule, LoaderState,
    ModuleLoadResult,
};
use crate::domain::errors::LoaderError;
use crate::ports::inbound::ModuleLoaderApi;
use crate::ports::outbound::{DependencySource, ModuleImporter};
use dashmap::DashMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use shared_types::{now, ModuleDescriptor};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Dependency-ordered parallel module loader
pub struct ModuleLoaderService {
    config: LoaderConfig,
    importer: Arc<dyn ModuleImporter>,
    dependencies: Arc<dyn DependencySource>,
    loaded: DashMap<String, LoadedModule>,
    state: RwLock<LoaderState>,
}

/// Result of loading one depth level.
struct LevelOutcome {
    results: Vec<ModuleLoadResult>,
    parallel: bool,
    fell_back: bool,
}

impl ModuleLoaderService {
    pub fn new(
        config: LoaderConfig,
        importer: Arc<dyn ModuleImporter>,
        dependencies: Arc<dyn DependencySource>,
    ) -> Result<Self, LoaderError> {
        config.validate()?;
        Ok(Self {
            config,
            importer,
            dependencies,
            loaded: DashMap::new(),
            state: RwLock::new(LoaderState::NotStarted),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn is_loaded(&self, module: &str) -> bool {
        self.loaded.contains_key(module)
    }

    fn set_state(&self, state: LoaderState) {
        debug!(?state, "Loader state");
        *self.state.write() = state;
    }

    /// Dependency-ordered run over depth levels.
    fn run_ordered(&self, descriptors: &[ModuleDescriptor]) -> Result<ImportSummary, LoaderError> {
        let started = Instant::now();
        self.set_state(LoaderState::ResolvingDependencies);
        let plan = self.plan(descriptors)?;

        let pool = if self.config.legacy_mode {
            None
        } else {
            self.build_pool()
        };
        let strategy = if pool.is_some() {
            LoadStrategy::Parallel
        } else {
            LoadStrategy::Sequential
        };

        let mut details = Vec::with_capacity(descriptors.len());
        let mut parallel_groups = Vec::new();
        let mut fallbacks = 0;

        if let Some(logging) = self.logging_descriptor(descriptors) {
            details.push(self.load_one(logging));
        }

        for (depth, level) in plan.levels.iter().enumerate() {
            self.set_state(LoaderState::LoadingLevel(depth));
            let modules: Vec<&ModuleDescriptor> = level
                .iter()
                .filter_map(|name| descriptors.iter().find(|d| &d.name == name))
                .collect();
            info!(depth, modules = modules.len(), "Loading dependency level");

            let outcome = self.load_level(pool.as_ref(), &modules);
            if outcome.parallel {
                parallel_groups.push(level.clone());
            }
            if outcome.fell_back {
                fallbacks += 1;
            }
            details.extend(outcome.results);
        }

        if plan.has_cycles() {
            warn!(
                modules = ?plan.circular,
                "Circular dependencies detected, skipping affected modules"
            );
            for name in &plan.circular {
                details.push(ModuleLoadResult::skipped(
                    name,
                    LoaderError::CircularDependency(vec![name.clone()]).to_string(),
                ));
            }
        }

        let mut summary =
            ImportSummary::new(details, parallel_groups, strategy, started.elapsed());
        summary.sequential_fallbacks = fallbacks;
        summary.failed_required = failed_required(&summary, descriptors);
        Ok(summary)
    }

    /// Declared order, one module at a time, logging first.
    fn run_legacy(&self, descriptors: &[ModuleDescriptor]) -> Result<ImportSummary, LoaderError> {
        let started = Instant::now();
        validate_descriptors(descriptors)?;
        self.set_state(LoaderState::LoadingLevel(0));

        let logging = self.logging_descriptor(descriptors);
        let mut details: Vec<ModuleLoadResult> = logging.map(|d| self.load_one(d)).into_iter().collect();
        details.extend(
            descriptors
                .iter()
                .filter(|d| d.name != self.config.logging_module)
                .map(|d| self.load_one(d)),
        );

        let mut summary =
            ImportSummary::new(details, Vec::new(), LoadStrategy::Legacy, started.elapsed());
        summary.failed_required = failed_required(&summary, descriptors);
        Ok(summary)
    }

    fn logging_descriptor<'a>(&self, descriptors: &'a [ModuleDescriptor]) -> Option<&'a ModuleDescriptor> {
        let logging = descriptors
            .iter()
            .find(|d| d.name == self.config.logging_module);
        if logging.is_none() {
            debug!(module = %self.config.logging_module, "Logging module not in descriptor list");
        }
        logging
    }

    fn build_pool(&self) -> Option<ThreadPool> {
        match ThreadPoolBuilder::new()
            .num_threads(self.config.max_parallel)
            .thread_name(|i| format!("module-loader-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "Worker pool unavailable, loading sequentially");
                None
            }
        }
    }

    fn load_level(&self, pool: Option<&ThreadPool>, modules: &[&ModuleDescriptor]) -> LevelOutcome {
        let sequential = |fell_back| LevelOutcome {
            results: modules.iter().map(|d| self.load_one(d)).collect(),
            parallel: false,
            fell_back,
        };

        let Some(pool) = pool.filter(|_| modules.len() > 1) else {
            return sequential(false);
        };
        match self.load_parallel(pool, modules) {
            Ok(results) => LevelOutcome {
                results,
                parallel: true,
                fell_back: false,
            },
            Err(e) => {
                warn!(error = %e, "Parallel level failed, falling back to sequential loading");
                sequential(true)
            }
        }
    }

    fn load_parallel(
        &self,
        pool: &ThreadPool,
        modules: &[&ModuleDescriptor],
    ) -> Result<Vec<ModuleLoadResult>, LoaderError> {
        panic::catch_unwind(AssertUnwindSafe(|| {
            pool.install(|| modules.par_iter().map(|d| self.load_one(d)).collect())
        }))
        .map_err(|payload| LoaderError::PoolUnavailable(panic_message(payload.as_ref())))
    }

    /// Import one module. Never panics; importer panics become failures.
    fn load_one(&self, descriptor: &ModuleDescriptor) -> ModuleLoadResult {
        let name = &descriptor.name;
        if !self.config.force && self.loaded.contains_key(name) {
            debug!(module = %name, "Module already loaded, skipping");
            return ModuleLoadResult::skipped(name, "Already loaded");
        }

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.importer.import(descriptor)));
        let load_time = started.elapsed();

        match outcome {
            Ok(Ok(message)) => {
                self.loaded.insert(
                    name.clone(),
                    LoadedModule {
                        name: name.clone(),
                        path: descriptor.path.clone(),
                        description: descriptor.description.clone(),
                        loaded_at: now(),
                        load_time,
                        message: message.clone(),
                    },
                );
                info!(module = %name, elapsed_ms = load_time.as_millis() as u64, "Module loaded");
                ModuleLoadResult::success(name, message, load_time)
            }
            Ok(Err(e)) => {
                warn!(module = %name, error = %e, "Module failed to load");
                ModuleLoadResult::failed(name, e.to_string(), load_time)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(module = %name, panic = %message, "Module importer panicked");
                ModuleLoadResult::failed(name, format!("importer panicked: {message}"), load_time)
            }
        }
    }
}

impl ModuleLoaderApi for ModuleLoaderService {
    fn import_modules(
        &self,
        descriptors: &[ModuleDescriptor],
    ) -> Result<ImportSummary, LoaderError> {
        info!(modules = descriptors.len(), "Starting module bootstrap");

        let result = match self.run_ordered(descriptors) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                warn!(error = %e, "Ordered loading failed, falling back to legacy loader");
                self.run_legacy(descriptors)
            }
        };

        match result {
            Ok(summary) => {
                self.set_state(LoaderState::Complete);
                info!(
                    imported = summary.imported_count,
                    failed = summary.failed_count,
                    skipped = summary.skipped_count,
                    strategy = %summary.strategy,
                    duration_ms = summary.duration.as_millis() as u64,
                    "Module bootstrap complete"
                );
                if !summary.failed_required.is_empty() {
                    error!(modules = ?summary.failed_required, "Required modules failed to load");
                }
                Ok(summary)
            }
            Err(e) => {
                self.set_state(LoaderState::Failed);
                error!(error = %e, "Module bootstrap failed");
                Err(e)
            }
        }
    }

    fn plan(&self, descriptors: &[ModuleDescriptor]) -> Result<LoadPlan, LoaderError> {
        validate_descriptors(descriptors)?;

        let graph = build_dependency_graph(
            descriptors,
            self.dependencies.as_ref(),
            &self.config.logging_module,
        )?;
        let mut plan = kahns_depth_levels(&graph);
        plan.logging_module = self
            .logging_descriptor(descriptors)
            .map(|d| d.name.clone());

        debug!(
            modules = graph.node_count(),
            edges = graph.edge_count(),
            levels = plan.levels.len(),
            max_parallelism = plan.max_parallelism(),
            "Dependency plan computed"
        );
        for missing in &plan.missing {
            debug!(module = %missing.module, dependency = %missing.dependency, "Unknown dependency ignored");
        }
        Ok(plan)
    }

    fn state(&self) -> LoaderState {
        *self.state.read()
    }

    fn loaded_modules(&self) -> Vec<LoadedModule> {
        let mut modules: Vec<LoadedModule> =
            self.loaded.iter().map(|m| m.value().clone()).collect();
        modules.sort_by_key(|m| m.loaded_at);
        modules
    }
}

fn failed_required(summary: &ImportSummary, descriptors: &[ModuleDescriptor]) -> Vec<String> {
    descriptors
        .iter()
        .filter(|d| d.required)
        .filter(|d| {
            summary
                .detail(&d.name)
                .map_or(true, |r| r.status == LoadStatus::Failed)
        })
        .map(|d| d.name.clone())
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
