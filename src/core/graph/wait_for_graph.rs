//! Wait-For Graph for detecting circular waits
//!
//! This module implements a directed wait-for graph (WFG) of processes. An
//! edge `A -> B` means "A is waiting on a resource held by B". Edges are
//! asserted by callers (or derived by blocking requests) and accumulate until
//! they are removed individually or the whole graph is reset.
//!
//! # How it works
//!
//! Cycle detection is a depth-first traversal started from every process
//! that has outgoing edges. It keeps two sets:
//! 1. *Visited*: nodes already explored during this detection pass. They are
//!    never explored again, even from a later root.
//! 2. *On stack*: nodes on the current traversal path. Reaching one of these
//!    again is a back edge, i.e. a cycle.
//!
//! The traversal uses an explicit stack of frames rather than recursion, so
//! long wait chains cannot exhaust the thread stack.

use crate::core::types::ProcessId;
use fxhash::{FxHashMap, FxHashSet};

/// Represents a directed graph of process wait relationships
#[derive(Debug, Default)]
pub struct WaitForGraph {
    /// Maps a process to all the processes it is waiting for (outgoing edges).
    pub(crate) edges: FxHashMap<ProcessId, FxHashSet<ProcessId>>,
}

/// One level of the explicit DFS stack: a node and the successors still to visit
struct Frame<'a> {
    node: &'a ProcessId,
    pending: Vec<&'a ProcessId>,
}

impl WaitForGraph {
    /// Create a new empty wait-for graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directed edge: `waiter` waits for `holder`
    ///
    /// Self-edges are accepted; they form a one-node cycle.
    ///
    /// # Returns
    /// `true` if the edge was not already present
    pub fn add_edge(&mut self, waiter: &ProcessId, holder: &ProcessId) -> bool {
        self.edges
            .entry(waiter.clone())
            .or_default()
            .insert(holder.clone())
    }

    /// Remove a specific directed edge: `waiter` waits for `holder`
    ///
    /// # Returns
    /// `true` if the edge existed
    pub fn remove_edge(&mut self, waiter: &ProcessId, holder: &ProcessId) -> bool {
        let Some(targets) = self.edges.get_mut(waiter) else {
            return false;
        };
        let removed = targets.remove(holder);
        if targets.is_empty() {
            self.edges.remove(waiter);
        }
        removed
    }

    /// Clear the wait edges for a process (what it is waiting for)
    ///
    /// Edges pointing at the process are left untouched.
    ///
    /// # Returns
    /// The processes it was waiting for, sorted by key
    pub fn clear_wait_edges(&mut self, waiter: &ProcessId) -> Vec<ProcessId> {
        let mut targets: Vec<ProcessId> = self
            .edges
            .remove(waiter)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        targets.sort();
        targets
    }

    /// Drop every edge in the graph
    pub fn clear(&mut self) {
        self.edges.clear();
    }

    /// Check whether `waiter` currently waits for `holder`
    pub fn contains_edge(&self, waiter: &ProcessId, holder: &ProcessId) -> bool {
        self.edges
            .get(waiter)
            .is_some_and(|targets| targets.contains(holder))
    }

    /// Processes `waiter` is waiting for, sorted by key
    pub fn waits_for(&self, waiter: &ProcessId) -> Vec<ProcessId> {
        let mut targets: Vec<ProcessId> = self
            .edges
            .get(waiter)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        targets.sort();
        targets
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(FxHashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Check whether the graph contains a circular wait
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Find a circular wait, returning the processes on it in wait order
    ///
    /// Which cycle is reported when several exist depends on hash order and
    /// is not stable. Only the presence of a cycle is.
    pub fn find_cycle(&self) -> Option<Vec<ProcessId>> {
        let mut visited: FxHashSet<&ProcessId> = FxHashSet::default();
        let mut on_stack: FxHashSet<&ProcessId> = FxHashSet::default();
        let mut frames: Vec<Frame<'_>> = Vec::new();

        for root in self.edges.keys() {
            if !visited.insert(root) {
                continue;
            }
            on_stack.insert(root);
            frames.push(self.frame(root));

            loop {
                let Some(frame) = frames.last_mut() else {
                    break;
                };
                let node = frame.node;

                match frame.pending.pop() {
                    Some(next) if on_stack.contains(next) => {
                        // Back edge: the cycle is the path from `next` down to here
                        let start = frames
                            .iter()
                            .position(|f| f.node == next)
                            .unwrap_or_default();
                        return Some(frames[start..].iter().map(|f| f.node.clone()).collect());
                    }
                    Some(next) => {
                        if visited.insert(next) {
                            on_stack.insert(next);
                            frames.push(self.frame(next));
                        }
                    }
                    None => {
                        // Subtree exhausted
                        on_stack.remove(node);
                        frames.pop();
                    }
                }
            }
        }

        None
    }

    fn frame<'a>(&'a self, node: &'a ProcessId) -> Frame<'a> {
        let pending = self
            .edges
            .get(node)
            .map(|targets| targets.iter().collect())
            .unwrap_or_default();
        Frame { node, pending }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: &str) -> ProcessId {
        ProcessId::from(id)
    }

    fn graph(edges: &[(&str, &str)]) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for (waiter, holder) in edges {
            graph.add_edge(&p(waiter), &p(holder));
        }
        graph
    }

    #[test]
    fn test_empty_graph_has_no_cycle() {
        assert!(!WaitForGraph::new().has_cycle());
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = graph(&[("A", "B"), ("B", "A")]);
        let mut cycle = graph.find_cycle().unwrap();
        cycle.sort();
        assert_eq!(cycle, vec![p("A"), p("B")]);
    }

    #[test]
    fn test_chain_is_not_a_cycle() {
        assert!(!graph(&[("A", "B"), ("B", "C")]).has_cycle());
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let graph = graph(&[("A", "A")]);
        assert_eq!(graph.find_cycle(), Some(vec![p("A")]));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        // Shared descendant reached twice must not be flagged
        let graph = graph(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")]);
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_cycle_reachable_from_tail() {
        let graph = graph(&[("X", "A"), ("A", "B"), ("B", "C"), ("C", "A")]);
        let mut cycle = graph.find_cycle().unwrap();
        cycle.sort();
        assert_eq!(cycle, vec![p("A"), p("B"), p("C")]);
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let mut graph = WaitForGraph::new();
        let n = 100_000;
        for i in 0..n {
            graph.add_edge(&p(&format!("P{i}")), &p(&format!("P{}", i + 1)));
        }
        assert!(!graph.has_cycle());

        graph.add_edge(&p(&format!("P{n}")), &p("P0"));
        assert_eq!(graph.find_cycle().map(|c| c.len()), Some(n + 1));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut graph = graph(&[("A", "B"), ("B", "A"), ("A", "C")]);
        assert_eq!(graph.edge_count(), 3);
        assert!(!graph.add_edge(&p("A"), &p("B")));

        assert!(graph.remove_edge(&p("B"), &p("A")));
        assert!(!graph.remove_edge(&p("B"), &p("A")));
        assert!(!graph.has_cycle());
        assert_eq!(graph.waits_for(&p("A")), vec![p("B"), p("C")]);

        assert_eq!(graph.clear_wait_edges(&p("A")), vec![p("B"), p("C")]);
        assert!(graph.is_empty());

        let mut graph = self::graph(&[("A", "B"), ("B", "A")]);
        graph.clear();
        assert!(!graph.has_cycle());
        assert_eq!(graph.edge_count(), 0);
    }
}
