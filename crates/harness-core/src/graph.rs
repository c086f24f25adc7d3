//! Dependency registry and deployment ordering.
//!
//! Dependencies are named components deployed before any test case runs. An
//! edge `A → B` means "B needs A": either declared explicitly through
//! `depends_on`, or implied by an [`OutputBinding`] that feeds one of A's
//! outputs into one of B's inputs.
//!
//! Ordering is Kahn's algorithm with registration order as the tie-break, so
//! a plain chain deploys in registration order and tears down in exactly the
//! reverse order. Cycles are rejected when the closing edge is added.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::descriptor::ComponentDescriptor;
use crate::error::{HarnessError, Result};

/// Feeds an upstream dependency's output into an input of a dependent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    /// Input key set on the dependent.
    pub input_key: String,
    /// Name of the upstream dependency.
    pub upstream: String,
    /// Output key read from the upstream dependency.
    pub output_key: String,
}

/// A named dependency and what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEntry {
    /// Registry name, e.g. `"dns-delegated"`.
    pub name: String,
    /// Component to deploy, with its declared inputs.
    #[serde(flatten)]
    pub descriptor: ComponentDescriptor,
    /// Dependencies that must be deployed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Inputs filled from upstream outputs at deploy time.
    #[serde(default)]
    pub bindings: Vec<OutputBinding>,
}

impl DependencyEntry {
    pub fn new(name: impl Into<String>, descriptor: ComponentDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            depends_on: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Require `upstream` to be deployed first.
    pub fn depends_on(mut self, upstream: impl Into<String>) -> Self {
        self.depends_on.push(upstream.into());
        self
    }

    /// Fill `input_key` from `upstream`'s `output_key`.
    pub fn bind(
        mut self,
        input_key: impl Into<String>,
        upstream: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        self.bindings.push(OutputBinding {
            input_key: input_key.into(),
            upstream: upstream.into(),
            output_key: output_key.into(),
        });
        self
    }

    /// Every dependency this entry waits for.
    pub fn upstreams(&self) -> BTreeSet<&str> {
        self.depends_on
            .iter()
            .map(String::as_str)
            .chain(self.bindings.iter().map(|b| b.upstream.as_str()))
            .collect()
    }
}

/// Registry of suite dependencies, populated before execution.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Registration order.
    entries: Vec<DependencyEntry>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dependency with no edges.
    ///
    /// Returns [`HarnessError::DuplicateDependency`] if `name` is taken.
    pub fn register(&mut self, name: &str, descriptor: ComponentDescriptor) -> Result<()> {
        self.register_entry(DependencyEntry::new(name, descriptor))
    }

    /// Register a dependency with its edges.
    ///
    /// Upstream names may refer to dependencies registered later; they are
    /// checked by [`resolve_order`](Self::resolve_order). Returns
    /// [`HarnessError::DependencyCycle`] if the entry closes a cycle with
    /// already-registered dependencies.
    pub fn register_entry(&mut self, entry: DependencyEntry) -> Result<()> {
        if self.index.contains_key(&entry.name) {
            return Err(HarnessError::DuplicateDependency { name: entry.name });
        }

        let name = entry.name.clone();
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(entry);

        if let Some(cycle) = self.find_cycle_through(&name) {
            // Roll back.
            self.entries.pop();
            self.index.remove(&name);
            return Err(HarnessError::DependencyCycle { names: cycle });
        }
        Ok(())
    }

    /// Add an output binding to an already-registered dependency.
    pub fn bind_output(
        &mut self,
        dependent: &str,
        input_key: &str,
        upstream: &str,
        output_key: &str,
    ) -> Result<()> {
        let idx = *self
            .index
            .get(dependent)
            .ok_or_else(|| HarnessError::UnknownDependency {
                name: dependent.to_string(),
                referenced_by: None,
            })?;

        self.entries[idx].bindings.push(OutputBinding {
            input_key: input_key.to_string(),
            upstream: upstream.to_string(),
            output_key: output_key.to_string(),
        });

        if let Some(cycle) = self.find_cycle_through(dependent) {
            self.entries[idx].bindings.pop();
            return Err(HarnessError::DependencyCycle { names: cycle });
        }
        Ok(())
    }

    /// Look up a dependency by name.
    pub fn get(&self, name: &str) -> Option<&DependencyEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Dependencies in registration order.
    pub fn entries(&self) -> &[DependencyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deployment order: upstreams before dependents, ties broken by
    /// registration order.
    ///
    /// Returns [`HarnessError::UnknownDependency`] for an edge to an
    /// unregistered name and [`HarnessError::DependencyCycle`] if no order
    /// exists.
    pub fn resolve_order(&self) -> Result<Vec<&DependencyEntry>> {
        let mut in_degree = vec![0usize; self.entries.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.entries.len()];

        for (i, entry) in self.entries.iter().enumerate() {
            for upstream in entry.upstreams() {
                let &u = self
                    .index
                    .get(upstream)
                    .ok_or_else(|| HarnessError::UnknownDependency {
                        name: upstream.to_string(),
                        referenced_by: Some(entry.name.clone()),
                    })?;
                in_degree[i] += 1;
                downstream[u].push(i);
            }
        }

        // Lowest registration index first keeps chains in registration order.
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.entries.len());

        while let Some(i) = ready.pop_first() {
            order.push(&self.entries[i]);
            for &d in &downstream[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    ready.insert(d);
                }
            }
        }

        if order.len() != self.entries.len() {
            let names = self
                .entries
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, e)| e.name.clone())
                .collect();
            return Err(HarnessError::DependencyCycle { names });
        }
        Ok(order)
    }

    /// Teardown order: the exact reverse of [`resolve_order`](Self::resolve_order).
    pub fn teardown_order(&self) -> Result<Vec<&DependencyEntry>> {
        let mut order = self.resolve_order()?;
        order.reverse();
        Ok(order)
    }

    /// DFS along upstream edges from `start`; returns the path if it comes back.
    fn find_cycle_through(&self, start: &str) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = vec![start.to_string()];
        if self.dfs_cycle(start, start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_cycle(
        &self,
        node: &str,
        target: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        let Some(entry) = self.get(node) else {
            return false;
        };
        for upstream in entry.upstreams() {
            if upstream == target {
                path.push(upstream.to_string());
                return true;
            }
            if !visited.insert(upstream.to_string()) {
                continue;
            }
            path.push(upstream.to_string());
            if self.dfs_cycle(upstream, target, visited, path) {
                return true;
            }
            path.pop();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str) -> ComponentDescriptor {
        ComponentDescriptor::new(name, "default-test")
    }

    fn names(order: &[&DependencyEntry]) -> Vec<String> {
        order.iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn test_empty_graph_has_empty_order() {
        let g = DependencyGraph::new();
        assert!(g.is_empty());
        assert!(g.resolve_order().unwrap().is_empty());
        assert!(g.teardown_order().unwrap().is_empty());
    }

    #[test]
    fn test_chain_follows_registration_order() {
        let mut g = DependencyGraph::new();
        g.register("vpc", desc("vpc")).unwrap();
        g.register("dns-primary", desc("dns-primary")).unwrap();
        g.register("dns-delegated", desc("dns-delegated")).unwrap();

        assert_eq!(
            names(&g.resolve_order().unwrap()),
            vec!["vpc", "dns-primary", "dns-delegated"]
        );
        assert_eq!(
            names(&g.teardown_order().unwrap()),
            vec!["dns-delegated", "dns-primary", "vpc"]
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut g = DependencyGraph::new();
        g.register("dns-delegated", desc("a")).unwrap();
        let err = g.register("dns-delegated", desc("b")).unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateDependency { .. }));
        assert_eq!(g.len(), 1);
        assert_eq!(g.get("dns-delegated").unwrap().descriptor.component, "a");
    }

    #[test]
    fn test_edges_override_registration_order() {
        let mut g = DependencyGraph::new();
        g.register_entry(DependencyEntry::new("app", desc("app")).depends_on("db"))
            .unwrap();
        g.register("db", desc("db")).unwrap();
        assert_eq!(names(&g.resolve_order().unwrap()), vec!["db", "app"]);
    }

    #[test]
    fn test_binding_implies_edge() {
        let mut g = DependencyGraph::new();
        g.register_entry(
            DependencyEntry::new("acm", desc("acm")).bind("zone_id", "dns", "default_dns_zone_id"),
        )
        .unwrap();
        g.register("dns", desc("dns")).unwrap();

        let order = g.resolve_order().unwrap();
        assert_eq!(names(&order), vec!["dns", "acm"]);
        assert_eq!(order[1].bindings[0].output_key, "default_dns_zone_id");
    }

    #[test]
    fn test_cycle_rejected_at_registration() {
        let mut g = DependencyGraph::new();
        g.register_entry(DependencyEntry::new("a", desc("a")).depends_on("b"))
            .unwrap();
        let err = g
            .register_entry(DependencyEntry::new("b", desc("b")).depends_on("a"))
            .unwrap_err();
        match err {
            HarnessError::DependencyCycle { names } => {
                assert_eq!(names.first().map(String::as_str), Some("b"));
                assert_eq!(names.last().map(String::as_str), Some("b"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        // Rolled back: "b" is not registered.
        assert!(g.get("b").is_none());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut g = DependencyGraph::new();
        let err = g
            .register_entry(DependencyEntry::new("a", desc("a")).depends_on("a"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::DependencyCycle { .. }));
        assert!(g.is_empty());
    }

    #[test]
    fn test_bind_output_cycle_rolled_back() {
        let mut g = DependencyGraph::new();
        g.register("a", desc("a")).unwrap();
        g.register_entry(DependencyEntry::new("b", desc("b")).bind("x", "a", "x"))
            .unwrap();
        let err = g.bind_output("a", "y", "b", "y").unwrap_err();
        assert!(matches!(err, HarnessError::DependencyCycle { .. }));
        assert!(g.get("a").unwrap().bindings.is_empty());
        assert_eq!(names(&g.resolve_order().unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_bind_output_unknown_dependent() {
        let mut g = DependencyGraph::new();
        let err = g.bind_output("ghost", "x", "a", "x").unwrap_err();
        assert!(matches!(err, HarnessError::UnknownDependency { .. }));
    }

    #[test]
    fn test_unknown_upstream_reported_at_resolve() {
        let mut g = DependencyGraph::new();
        g.register_entry(DependencyEntry::new("acm", desc("acm")).depends_on("dns"))
            .unwrap();
        match g.resolve_order().unwrap_err() {
            HarnessError::UnknownDependency {
                name,
                referenced_by,
            } => {
                assert_eq!(name, "dns");
                assert_eq!(referenced_by.as_deref(), Some("acm"));
            }
            other => panic!("expected unknown dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_entry_json_is_flat() {
        let entry: DependencyEntry = serde_json::from_value(serde_json::json!({
            "name": "dns",
            "component": "dns-delegated",
            "stack": "default-test",
            "inputs": { "zone_config": [] },
            "bindings": [{ "input_key": "vpc_id", "upstream": "vpc", "output_key": "id" }]
        }))
        .unwrap();
        assert_eq!(entry.descriptor.component, "dns-delegated");
        assert!(entry.depends_on.is_empty());
        assert_eq!(entry.upstreams().into_iter().collect::<Vec<_>>(), vec!["vpc"]);
    }

    #[test]
    fn test_diamond_resolves() {
        let mut g = DependencyGraph::new();
        g.register("root", desc("root")).unwrap();
        g.register_entry(DependencyEntry::new("left", desc("left")).depends_on("root"))
            .unwrap();
        g.register_entry(DependencyEntry::new("right", desc("right")).depends_on("root"))
            .unwrap();
        g.register_entry(
            DependencyEntry::new("leaf", desc("leaf"))
                .depends_on("left")
                .depends_on("right"),
        )
        .unwrap();
        assert_eq!(
            names(&g.resolve_order().unwrap()),
            vec!["root", "left", "right", "leaf"]
        );
    }
}
