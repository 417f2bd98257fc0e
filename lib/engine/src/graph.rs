//! Field dependency graph
//!
//! Nodes are the fields of one definition plus the raw source paths their
//! expressions read. An edge `a -> b` means the expression of `a` reads
//! field `b`, so `b` must be computed first. Raw paths are leaves: they have
//! no dependencies, are bound straight from the documents, and never appear
//! in a computation plan.
//!
//! Phases come from Kahn's algorithm: each round takes every node whose
//! dependencies are all computed. Nodes left over when no round makes
//! progress lie on, or behind, a cycle.

use crate::definition::FieldSpec;
use crate::error::CycleError;
use crate::plan::ComputationPlan;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
    leaves: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: &str) {
        self.dependencies.entry(node.to_string()).or_default();
    }

    /// Record that `from` reads `to`
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(to);
        self.dependencies
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    /// Record a raw source path read by some expression
    pub fn add_leaf(&mut self, path: &str) {
        self.leaves.insert(path.to_string());
    }

    /// Computed nodes; raw leaves are listed by [`leaves`](Self::leaves)
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &str> {
        self.leaves.iter().map(String::as_str)
    }

    #[inline]
    pub fn is_leaf(&self, node: &str) -> bool {
        self.leaves.contains(node)
    }

    #[inline]
    pub fn contains(&self, node: &str) -> bool {
        self.dependencies.contains_key(node) || self.leaves.contains(node)
    }

    pub fn dependencies(&self, node: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(node)
    }

    /// Nodes that read `node`
    pub fn dependents(&self, node: &str) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(node))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }
}

/// One node per field, one edge per field an expression reads, and one
/// leaf per raw path an expression reads
pub fn build_graph(fields: &BTreeMap<String, FieldSpec>) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for (name, spec) in fields {
        graph.add_node(name);
        for variable in spec.variables().into_iter().flatten() {
            match referenced_field(variable, |f| fields.contains_key(f)) {
                Some(target) => graph.add_edge(name, target),
                None => graph.add_leaf(variable),
            }
        }
    }
    graph
}

/// The field an identifier reads: the identifier itself, or its longest
/// dotted prefix that names a field (`stats.total` reads `stats`).
pub fn referenced_field<'a>(identifier: &'a str, is_field: impl Fn(&str) -> bool) -> Option<&'a str> {
    if is_field(identifier) {
        return Some(identifier);
    }
    identifier
        .rmatch_indices('.')
        .map(|(i, _)| &identifier[..i])
        .find(|prefix| is_field(prefix))
}

/// Phase the graph with Kahn's algorithm. Fields within a phase are sorted
/// by name so plans are deterministic.
pub fn topological_sort(graph: &DependencyGraph) -> Result<ComputationPlan, CycleError> {
    let mut pending: BTreeMap<&str, usize> = graph
        .dependencies
        .iter()
        .map(|(node, deps)| (node.as_str(), deps.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (node, deps) in &graph.dependencies {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(node.as_str());
        }
    }

    let mut phases = Vec::new();
    loop {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, &remaining)| remaining == 0)
            .map(|(node, _)| *node)
            .collect();
        if ready.is_empty() {
            break;
        }
        for node in &ready {
            pending.remove(node);
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(remaining) = pending.get_mut(dependent) {
                    *remaining -= 1;
                }
            }
        }
        phases.push(ready.into_iter().map(String::from).collect());
    }

    if pending.is_empty() {
        return Ok(ComputationPlan::new(phases));
    }
    let stuck: BTreeSet<&str> = pending.keys().copied().collect();
    Err(CycleError {
        definition: String::new(),
        path: trace_cycle_path(graph, &stuck),
    })
}

/// Walk dependencies among the `stuck` nodes until one repeats and return
/// the loop, e.g. `[a, b, a]`. Every stuck node has a stuck dependency, so
/// the walk always closes.
pub fn trace_cycle_path(graph: &DependencyGraph, stuck: &BTreeSet<&str>) -> Vec<String> {
    let Some(&start) = stuck.iter().next() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut seen: HashMap<&str, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let next = graph
            .dependencies(current)
            .and_then(|deps| deps.iter().map(String::as_str).find(|d| stuck.contains(d)));
        let Some(next) = next else {
            return path.into_iter().map(String::from).collect();
        };
        if let Some(&index) = seen.get(next) {
            let mut cycle: Vec<String> = path[index..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}
