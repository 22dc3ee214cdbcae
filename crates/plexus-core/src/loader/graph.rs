//! Dependency graph diagnostics.
//!
//! The loader breaks cycles while recursing, so cycles are never fatal. This
//! module only finds them up front so they can be logged.

use std::collections::{HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use plexus_types::ModuleId;
use plexus_types::module::ModuleManifest;

/// Every dependency cycle reachable from `roots`.
///
/// Each cycle is the sorted list of its members; the result is sorted too.
/// A module depending on itself is reported as a one-element cycle.
pub fn find_dependency_cycles(manifests: &[ModuleManifest], roots: &[ModuleId]) -> Vec<Vec<ModuleId>> {
    let by_id: HashMap<&ModuleId, &ModuleManifest> = manifests.iter().map(|m| (&m.id, m)).collect();

    let mut graph = DiGraph::<ModuleId, ()>::new();
    let mut nodes: HashMap<ModuleId, NodeIndex> = HashMap::new();
    let mut visited = HashSet::new();
    let mut to_visit: Vec<ModuleId> = roots.to_vec();

    while let Some(current) = to_visit.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let idx = *nodes
            .entry(current.clone())
            .or_insert_with(|| graph.add_node(current.clone()));

        let Some(manifest) = by_id.get(&current) else {
            continue;
        };
        for dep in &manifest.dependencies {
            let dep_idx = *nodes
                .entry(dep.clone())
                .or_insert_with(|| graph.add_node(dep.clone()));
            // Edge from module -> dependency
            graph.add_edge(idx, dep_idx, ());
            to_visit.push(dep.clone());
        }
    }

    let mut cycles: Vec<Vec<ModuleId>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut members: Vec<ModuleId> = scc.into_iter().map(|idx| graph[idx].clone()).collect();
            members.sort();
            members
        })
        .collect();
    cycles.sort();
    cycles
}
