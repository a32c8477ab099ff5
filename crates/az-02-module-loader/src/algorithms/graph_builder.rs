//! Dependency graph construction from module descriptors

use crate::domain::entities::{DependencyGraph, MissingDependency};
use crate::domain::errors::LoaderError;
use crate::ports::outbound::DependencySource;
use shared_types::ModuleDescriptor;
use std::collections::HashSet;
use tracing::debug;

/// Build `{module: [dependencies]}` for `descriptors`.
///
/// `always_first` (the logging module) is left out of the graph entirely:
/// it is loaded before anything else, so edges to it are satisfied by
/// construction. Edges to modules outside the descriptor list are recorded
/// as missing and dropped.
pub fn build_dependency_graph(
    descriptors: &[ModuleDescriptor],
    source: &dyn DependencySource,
    always_first: &str,
) -> Result<DependencyGraph, LoaderError> {
    let known: HashSet<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
    let mut graph = DependencyGraph::new();

    for descriptor in descriptors.iter().filter(|d| d.name != always_first) {
        graph.add_node(&descriptor.name);

        for dependency in source.dependencies(descriptor)? {
            if dependency == always_first {
                continue;
            }
            if known.contains(dependency.as_str()) {
                graph.add_edge(&descriptor.name, &dependency);
            } else {
                debug!(
                    module = %descriptor.name,
                    dependency = %dependency,
                    "Ignoring dependency outside the module list"
                );
                graph.missing.push(MissingDependency {
                    module: descriptor.name.clone(),
                    dependency,
                });
            }
        }
    }

    Ok(graph)
}

/// Reject empty names, empty paths and duplicate names.
pub fn validate_descriptors(descriptors: &[ModuleDescriptor]) -> Result<(), LoaderError> {
    let mut seen = HashSet::new();
    for descriptor in descriptors {
        descriptor
            .validate()
            .map_err(|e| LoaderError::InvalidDescriptor(e.to_string()))?;
        if !seen.insert(descriptor.name.as_str()) {
            return Err(LoaderError::InvalidDescriptor(format!(
                "duplicate module {}",
                descriptor.name
            )));
        }
    }
    Ok(())
}
