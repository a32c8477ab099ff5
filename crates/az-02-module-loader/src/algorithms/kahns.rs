//! Kahn's Topological Sort into depth levels
//!
//! O(V + E). A module's depth is `1 + max(depth of its dependencies)`, or 0
//! without dependencies, which is exactly the round of Kahn's algorithm in
//! which its in-degree reaches zero.
//!
//! Cycles do not abort the sort: whatever is left with a non-zero in-degree
//! after the last round is reported as circular.

use crate::domain::entities::{DependencyGraph, LoadPlan};
use std::collections::BTreeMap;

/// Sort `graph` into depth levels.
///
/// Levels are sorted by name so the same graph always yields the same plan.
pub fn kahns_depth_levels(graph: &DependencyGraph) -> LoadPlan {
    let mut plan = LoadPlan {
        missing: graph.missing.clone(),
        ..LoadPlan::default()
    };
    if graph.dependencies.is_empty() {
        return plan;
    }

    // 1. In-degree = number of unmet dependencies
    let mut in_degree: BTreeMap<&str, usize> = graph
        .dependencies
        .iter()
        .map(|(module, deps)| (module.as_str(), deps.len()))
        .collect();
    let dependents = graph.dependents();

    // 2. Depth 0: modules with no dependencies (BTreeMap order is sorted)
    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(module, _)| *module)
        .collect();

    // 3. One round per depth
    while !queue.is_empty() {
        let depth = plan.levels.len();
        let current: Vec<&str> = std::mem::take(&mut queue);

        let mut next_queue: Vec<&str> = Vec::new();
        for module in &current {
            plan.depths.insert(module.to_string(), depth);
            let Some(needed_by) = dependents.get(module) else {
                continue;
            };
            for dependent in needed_by {
                let Some(degree) = in_degree.get_mut(dependent) else {
                    continue;
                };
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    next_queue.push(*dependent);
                }
            }
        }

        plan.levels
            .push(current.into_iter().map(str::to_string).collect());
        next_queue.sort_unstable();
        queue = next_queue;
    }

    // 4. Anything not scheduled is on or behind a cycle
    plan.circular = in_degree
        .into_iter()
        .filter(|(module, _)| !plan.depths.contains_key(*module))
        .map(|(module, _)| module.to_string())
        .collect();

    plan
}
