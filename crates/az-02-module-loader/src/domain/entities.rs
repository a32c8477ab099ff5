//! Core entities for the module loader

use serde::{Deserialize, Serialize};
use shared_types::Timestamp;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A dependency on a module outside the descriptor list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub module: String,
    pub dependency: String,
}

/// `{module: [dependencies]}` restricted to known modules.
///
/// Dependency lists are sorted and deduplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Dropped edges, kept for reporting.
    pub missing: Vec<MissingDependency>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module node (no-op if present)
    pub fn add_node(&mut self, module: &str) {
        self.dependencies.entry(module.to_string()).or_default();
    }

    /// `module` depends on `dependency`
    pub fn add_edge(&mut self, module: &str, dependency: &str) {
        let deps = self.dependencies.entry(module.to_string()).or_default();
        if let Err(at) = deps.binary_search_by(|d| d.as_str().cmp(dependency)) {
            deps.insert(at, dependency.to_string());
        }
    }

    pub fn contains(&self, module: &str) -> bool {
        self.dependencies.contains_key(module)
    }

    pub fn node_count(&self) -> usize {
        self.dependencies.len()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(Vec::len).sum()
    }

    /// Reverse edges: dependency -> modules that need it
    pub fn dependents(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (module, deps) in &self.dependencies {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(module.as_str());
            }
        }
        dependents
    }
}

/// Depth-level schedule computed from a dependency graph
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadPlan {
    /// Loaded before everything else, outside the graph
    pub logging_module: Option<String>,
    /// `levels[d]` holds the modules at depth `d`, sorted by name
    pub levels: Vec<Vec<String>>,
    pub depths: BTreeMap<String, usize>,
    /// Cycle members and everything that depends on them
    pub circular: Vec<String>,
    pub missing: Vec<MissingDependency>,
}

impl LoadPlan {
    pub fn depth(&self, module: &str) -> Option<usize> {
        self.depths.get(module).copied()
    }

    pub fn scheduled_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn max_parallelism(&self) -> usize {
        self.levels.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn has_cycles(&self) -> bool {
        !self.circular.is_empty()
    }
}

/// Outcome of one module
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStatus::Success => write!(f, "Success"),
            LoadStatus::Failed => write!(f, "Failed"),
            LoadStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLoadResult {
    pub name: String,
    pub status: LoadStatus,
    pub message: String,
    pub load_time: Duration,
}

impl ModuleLoadResult {
    pub fn success(name: &str, message: impl Into<String>, load_time: Duration) -> Self {
        Self {
            name: name.to_string(),
            status: LoadStatus::Success,
            message: message.into(),
            load_time,
        }
    }

    pub fn failed(name: &str, message: impl Into<String>, load_time: Duration) -> Self {
        Self {
            name: name.to_string(),
            status: LoadStatus::Failed,
            message: message.into(),
            load_time,
        }
    }

    pub fn skipped(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: LoadStatus::Skipped,
            message: message.into(),
            load_time: Duration::ZERO,
        }
    }
}

/// How a run loaded its modules
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStrategy {
    /// Depth levels, multi-module levels on the worker pool
    Parallel,
    /// Depth levels, one module at a time
    Sequential,
    /// Declared order, no dependency resolution
    Legacy,
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::Parallel => write!(f, "Parallel"),
            LoadStrategy::Sequential => write!(f, "Sequential"),
            LoadStrategy::Legacy => write!(f, "Legacy"),
        }
    }
}

/// Bootstrap run state machine
///
/// ```text
/// NotStarted → ResolvingDependencies → LoadingLevel(0) → ... → Complete
///                                                            ↘ Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoaderState {
    NotStarted,
    ResolvingDependencies,
    LoadingLevel(usize),
    Complete,
    Failed,
}

impl LoaderState {
    pub fn is_finished(&self) -> bool {
        matches!(self, LoaderState::Complete | LoaderState::Failed)
    }
}

/// A module recorded as loaded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedModule {
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    pub loaded_at: Timestamp,
    pub load_time: Duration,
    pub message: String,
}

/// Aggregate result of a bootstrap run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub details: Vec<ModuleLoadResult>,
    /// Successfully loaded modules in the order they finished
    pub load_order: Vec<String>,
    /// Levels that were dispatched to the worker pool
    pub parallel_groups: Vec<Vec<String>>,
    pub duration: Duration,
    pub strategy: LoadStrategy,
    /// Levels that fell back to sequential loading
    pub sequential_fallbacks: usize,
    /// Required modules that did not load
    pub failed_required: Vec<String>,
}

impl ImportSummary {
    pub fn new(
        details: Vec<ModuleLoadResult>,
        parallel_groups: Vec<Vec<String>>,
        strategy: LoadStrategy,
        duration: Duration,
    ) -> Self {
        let count = |status: LoadStatus| details.iter().filter(|d| d.status == status).count();
        Self {
            imported_count: count(LoadStatus::Success),
            failed_count: count(LoadStatus::Failed),
            skipped_count: count(LoadStatus::Skipped),
            load_order: details
                .iter()
                .filter(|d| d.status == LoadStatus::Success)
                .map(|d| d.name.clone())
                .collect(),
            details,
            parallel_groups,
            duration,
            strategy,
            sequential_fallbacks: 0,
            failed_required: Vec::new(),
        }
    }

    pub fn detail(&self, name: &str) -> Option<&ModuleLoadResult> {
        self.details.iter().find(|d| d.name == name)
    }

    /// No failures among the attempted modules
    pub fn is_success(&self) -> bool {
        self.failed_count == 0
    }

    /// Position of `name` in the load order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.load_order.iter().position(|n| n == name)
    }
}
