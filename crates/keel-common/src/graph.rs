//! Service dependency graph
//!
//! Built from `depends_on` edges. Used by schema validation to find cycles
//! and by the orchestrator to wait on health checks in start-up order.

use std::collections::{BTreeMap, BTreeSet};

/// Directed graph of `service -> dependency` edges
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(service, dependencies)` pairs
    pub fn from_edges<'a, I, D>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let mut graph = Self::new();
        for (name, deps) in nodes {
            graph.add_node(name);
            for dep in deps {
                graph.add_edge(name, dep);
            }
        }
        graph
    }

    /// Add a node without edges
    pub fn add_node(&mut self, name: &str) {
        self.edges.entry(name.to_string()).or_default();
    }

    /// Add a `from -> to` edge, creating both nodes
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(to);
        let deps = self.edges.entry(from.to_string()).or_default();
        if !deps.iter().any(|d| d == to) {
            deps.push(to.to_string());
        }
    }

    /// Direct dependencies of `name`
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every distinct cycle, each reported as a closed path (`a -> b -> a`).
    ///
    /// Depth-first traversal in name order, so the output is deterministic.
    /// A cycle is reported once no matter which of its nodes is visited first.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut seen: BTreeSet<BTreeSet<&str>> = BTreeSet::new();
        let mut cycles = Vec::new();

        for start in self.edges.keys() {
            if !marks.contains_key(start.as_str()) {
                self.visit(start, &mut marks, &mut stack, &mut seen, &mut cycles);
            }
        }
        cycles
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        seen: &mut BTreeSet<BTreeSet<&'a str>>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        marks.insert(node, Mark::InProgress);
        stack.push(node);

        for dep in self.dependencies(node) {
            match marks.get(dep.as_str()) {
                None => self.visit(dep, marks, stack, seen, cycles),
                Some(Mark::InProgress) => {
                    if let Some(pos) = stack.iter().position(|n| *n == dep.as_str()) {
                        let members: BTreeSet<&str> = stack[pos..].iter().copied().collect();
                        if seen.insert(members) {
                            let mut path: Vec<String> =
                                stack[pos..].iter().map(|n| n.to_string()).collect();
                            path.push(dep.clone());
                            cycles.push(path);
                        }
                    }
                }
                Some(Mark::Done) => {}
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
    }

    /// Nodes ordered so every dependency precedes its dependents.
    ///
    /// Returns `None` if the graph has a cycle.
    pub fn start_order(&self) -> Option<Vec<String>> {
        let mut order = Vec::with_capacity(self.edges.len());
        let mut placed: BTreeSet<&str> = BTreeSet::new();

        while placed.len() < self.edges.len() {
            let ready: Vec<&str> = self
                .edges
                .iter()
                .filter(|(name, deps)| {
                    !placed.contains(name.as_str())
                        && deps.iter().all(|d| placed.contains(d.as_str()))
                })
                .map(|(name, _)| name.as_str())
                .collect();
            if ready.is_empty() {
                return None;
            }
            for name in ready {
                placed.insert(name);
                order.push(name.to_string());
            }
        }
        Some(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&'static str, &[&'static str])]) -> DependencyGraph {
        DependencyGraph::from_edges(edges.iter().map(|(n, d)| (*n, d.iter().copied())))
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let g = graph(&[("api", &["db", "cache"]), ("worker", &["db"]), ("db", &[])]);
        assert!(g.find_cycles().is_empty());
    }

    #[test]
    fn test_cycle_path_is_reported_closed() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let cycles = g.find_cycles();
        assert_eq!(cycles, vec![vec!["a", "b", "c", "a"]]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let g = graph(&[("a", &["a"])]);
        assert_eq!(g.find_cycles(), vec![vec!["a", "a"]]);
    }

    #[test]
    fn test_two_independent_cycles() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("x", &["y"]), ("y", &["x"])]);
        assert_eq!(g.find_cycles().len(), 2);
    }

    #[test]
    fn test_start_order_puts_dependencies_first() {
        let g = graph(&[("api", &["db"]), ("db", &[]), ("web", &["api"])]);
        assert_eq!(g.start_order().unwrap(), vec!["db", "api", "web"]);
    }

    #[test]
    fn test_start_order_none_on_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(g.start_order().is_none());
    }
}
