//! Generic dependency graph.
//!
//! [`DependencyGraph`] stores opaque node values in a petgraph [`Graph`] and
//! keeps a side index from value to [`NodeIndex`] so callers can address nodes
//! by value. An edge `from -> to` records that `from` depends on `to`, so the
//! outgoing edges of a node are its dependencies.
//!
//! ## Resolution order
//!
//! [`DependencyGraph::resolve`] returns the transitive dependency closure of a
//! set of targets, dependency-first and deduplicated. Dependencies of a node
//! are visited in the order their edges were added, and a node reached along
//! two paths keeps the position where it was first emitted.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::GraphError;

pub struct DependencyGraph<T> {
    graph: DiGraph<T, ()>,
    index: HashMap<T, NodeIndex>,
}

impl<T> DependencyGraph<T>
where
    T: Clone + Eq + Hash + Display,
{
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Registers `value` as a vertex.
    pub fn add_node(&mut self, value: T) -> Result<(), GraphError> {
        if self.index.contains_key(&value) {
            return Err(GraphError::DuplicateNode(value.to_string()));
        }

        let index = self.graph.add_node(value.clone());
        self.index.insert(value, index);
        Ok(())
    }

    /// Records that `from` depends on `to`. Both endpoints must already be
    /// part of the graph, adding the same edge twice has no further effect.
    pub fn add_edge(&mut self, from: &T, to: &T) -> Result<(), GraphError> {
        let a = self.index_of(from)?;
        let b = self.index_of(to)?;
        self.graph.update_edge(a, b, ());
        Ok(())
    }

    pub fn contains(&self, value: &T) -> bool {
        self.index.contains_key(value)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Iterates all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.graph.node_weights()
    }

    /// Direct dependencies of `value`, in the order the edges were added.
    pub fn dependencies(&self, value: &T) -> Result<Vec<&T>, GraphError> {
        let index = self.index_of(value)?;
        Ok(self
            .outgoing(index)
            .into_iter()
            .map(|dep| &self.graph[dep])
            .collect())
    }

    /// Walks every node with an explicit stack of the current path and fails
    /// on the first node found while it is still on that path.
    pub fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Fresh,
            OnPath,
            Done,
        }

        let mut marks = vec![Mark::Fresh; self.graph.node_count()];

        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::Fresh {
                continue;
            }

            // (node, dependencies still to visit)
            let mut stack = vec![(start, self.outgoing(start).into_iter())];
            marks[start.index()] = Mark::OnPath;

            while let Some((node, deps)) = stack.last_mut() {
                let node = *node;
                match deps.next() {
                    Some(dep) => match marks[dep.index()] {
                        Mark::OnPath => {
                            return Err(GraphError::Cycle(self.graph[dep].to_string()));
                        }
                        Mark::Fresh => {
                            marks[dep.index()] = Mark::OnPath;
                            stack.push((dep, self.outgoing(dep).into_iter()));
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node.index()] = Mark::Done;
                        stack.pop();
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns the deduplicated union of the transitive dependencies of every
    /// target followed by the target itself, dependency-first.
    ///
    /// The whole graph is checked for cycles first, so a cyclic graph is
    /// rejected even when the requested targets do not touch the cycle.
    pub fn resolve(&self, targets: &[T]) -> Result<Vec<T>, GraphError> {
        self.check_acyclic()?;

        let mut seen = HashSet::new();
        let mut order = Vec::new();

        for target in targets {
            let index = self.index_of(target)?;
            self.visit(index, &mut seen, &mut order);
        }

        Ok(order.into_iter().map(|i| self.graph[i].clone()).collect())
    }

    fn visit(&self, index: NodeIndex, seen: &mut HashSet<NodeIndex>, order: &mut Vec<NodeIndex>) {
        if !seen.insert(index) {
            return;
        }

        for dep in self.outgoing(index) {
            self.visit(dep, seen, order);
        }

        order.push(index);
    }

    fn index_of(&self, value: &T) -> Result<NodeIndex, GraphError> {
        self.index
            .get(value)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(value.to_string()))
    }

    /// petgraph walks adjacency lists newest-first, flip to insertion order.
    fn outgoing(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        deps.reverse();
        deps
    }
}

impl<T> Default for DependencyGraph<T>
where
    T: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&'static str], edges: &[(&'static str, &'static str)]) -> DependencyGraph<&'static str> {
        let mut graph = DependencyGraph::new();
        for node in nodes {
            graph.add_node(*node).unwrap();
        }
        for (from, to) in edges {
            graph.add_edge(from, to).unwrap();
        }
        graph
    }

    fn position(order: &[&str], node: &str) -> usize {
        order.iter().position(|n| *n == node).unwrap()
    }

    #[test]
    fn test_duplicate_node() {
        let mut graph = graph(&["a"], &[]);
        assert_eq!(graph.add_node("a"), Err(GraphError::DuplicateNode("a".into())));
    }

    #[test]
    fn test_edge_requires_nodes() {
        let mut graph = graph(&["a"], &[]);
        assert_eq!(graph.add_edge(&"a", &"b"), Err(GraphError::UnknownNode("b".into())));
        assert_eq!(graph.add_edge(&"c", &"a"), Err(GraphError::UnknownNode("c".into())));
    }

    #[test]
    fn test_dependency_first() {
        let graph = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        assert_eq!(graph.resolve(&["a"]).unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_edges_keep_insertion_order() {
        let graph = graph(&["t", "x", "y", "z"], &[("t", "x"), ("t", "y"), ("t", "z")]);
        assert_eq!(graph.dependencies(&"t").unwrap(), vec![&"x", &"y", &"z"]);
        assert_eq!(graph.resolve(&["t"]).unwrap(), vec!["x", "y", "z", "t"]);
    }

    #[test]
    fn test_shared_dependency_once() {
        // diamond: a -> b -> d, a -> c -> d
        let graph = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );

        let order = graph.resolve(&["b", "c"]).unwrap();
        assert_eq!(order.iter().filter(|n| **n == "d").count(), 1);
        assert!(position(&order, "d") < position(&order, "b"));
        assert!(position(&order, "d") < position(&order, "c"));
        assert!(!order.contains(&"a"));
    }

    #[test]
    fn test_order_independent_of_target_order() {
        let graph = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);

        for targets in [vec!["a", "b", "c"], vec!["c", "b", "a"], vec!["b", "a"]] {
            let order = graph.resolve(&targets).unwrap();
            assert!(position(&order, "c") < position(&order, "b"));
            assert!(position(&order, "b") < position(&order, "a"));
            assert_eq!(order.len(), 3);
        }
    }

    #[test]
    fn test_cycle_rejected() {
        let graph = graph(&["a", "b", "c"], &[("a", "b"), ("b", "a")]);
        assert!(matches!(graph.check_acyclic(), Err(GraphError::Cycle(_))));
        // c is not on the cycle but the graph is still rejected
        assert!(matches!(graph.resolve(&["c"]), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_self_loop_rejected() {
        let graph = graph(&["a"], &[("a", "a")]);
        assert_eq!(graph.check_acyclic(), Err(GraphError::Cycle("a".into())));
    }

    #[test]
    fn test_unknown_target() {
        let graph = graph(&["a"], &[]);
        assert_eq!(graph.resolve(&["z"]), Err(GraphError::UnknownNode("z".into())));
    }

    #[test]
    fn test_empty_targets() {
        let graph = graph(&["a"], &[]);
        assert!(graph.resolve(&[]).unwrap().is_empty());
    }
}
