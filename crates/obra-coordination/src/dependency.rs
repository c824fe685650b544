//! Dependency Resolver — the DAG over `WorkItem.dependency_ids` within a
//! project (spec §4.12).
//!
//! Built on `petgraph`, already part of the teacher's dependency stack
//! (used there for a semantic code graph); here it backs the work-item
//! DAG instead. Kahn's algorithm (`petgraph::algo::toposort`) drives both
//! the ready-set/cycle-check operations; cascade uses BFS reachability.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::state::types::Id;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("would introduce a cycle: {0:?}")]
    WouldCycle(Vec<Id>),

    #[error("dependency depth exceeds limit: item {item} depth {depth} > max {max}")]
    TooDeep { item: Id, depth: usize, max: usize },
}

/// An in-memory view of one project's dependency DAG. `from -> to` edges
/// mean "`from` depends on `to`"; `to` must complete before `from` is
/// ready.
pub struct DependencyGraph {
    graph: DiGraph<Id, ()>,
    index_of: HashMap<Id, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_of: HashMap::new(),
        }
    }

    fn node(&mut self, id: Id) -> NodeIndex {
        *self
            .index_of
            .entry(id)
            .or_insert_with(|| self.graph.add_node(id))
    }

    /// Seed the graph with an existing work item and its already-recorded
    /// dependencies.
    pub fn insert(&mut self, id: Id, dependency_ids: Vec<Id>) {
        let from = self.node(id);
        for dep in dependency_ids {
            let to = self.node(dep);
            self.graph.update_edge(from, to, ());
        }
    }

    /// Seed the graph with a work item that does not exist in storage
    /// yet, so `validate_acyclic`/`validate_depth` can be checked before
    /// the item is actually persisted.
    pub fn insert_pending(&mut self, id: Id, dependency_ids: Vec<Id>) {
        self.insert(id, dependency_ids);
    }

    /// Add a single edge, rejecting it (without mutating the graph) if it
    /// would introduce a cycle.
    pub fn add_edge(&mut self, from: Id, to: Id) -> Result<(), DependencyError> {
        let from_idx = self.node(from);
        let to_idx = self.node(to);
        self.graph.update_edge(from_idx, to_idx, ());
        if let Err(cycle) = self.find_cycle() {
            self.graph.remove_edge(self.graph.find_edge(from_idx, to_idx).unwrap());
            return Err(DependencyError::WouldCycle(cycle));
        }
        Ok(())
    }

    /// Full cycle check via Kahn's algorithm (`petgraph::algo::toposort`).
    /// Returns the offending cycle as an ordered id list on failure.
    pub fn validate_acyclic(&self) -> Result<(), DependencyError> {
        self.find_cycle().map_err(DependencyError::WouldCycle)
    }

    fn find_cycle(&self) -> Result<(), Vec<Id>> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle_node) => {
                let offending = self.trace_cycle(cycle_node.node_id());
                Err(offending)
            }
        }
    }

    /// Reconstruct a concrete cycle starting at `start` via DFS, for
    /// error reporting. `toposort` only tells us *a* node on some cycle,
    /// not the cycle itself.
    fn trace_cycle(&self, start: NodeIndex) -> Vec<Id> {
        let mut path = vec![start];
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut current = start;
        loop {
            if !visited.insert(current) {
                break;
            }
            let Some(next) = self.graph.neighbors(current).next() else {
                break;
            };
            if next == start {
                path.push(next);
                break;
            }
            path.push(next);
            current = next;
        }
        path.into_iter().map(|idx| self.graph[idx]).collect()
    }

    /// Enforce `dependencies.max_depth` (default 10): the longest chain
    /// of dependencies reachable from `id` must not exceed `max`.
    pub fn validate_depth(&self, id: Id, max: usize) -> Result<(), DependencyError> {
        let Some(&start) = self.index_of.get(&id) else {
            return Ok(());
        };
        let depth = self.longest_chain_from(start, &mut HashSet::new());
        if depth > max {
            return Err(DependencyError::TooDeep { item: id, depth, max });
        }
        Ok(())
    }

    fn longest_chain_from(&self, node: NodeIndex, visiting: &mut HashSet<NodeIndex>) -> usize {
        if !visiting.insert(node) {
            // Already on the current path: a cycle, handled separately
            // by `validate_acyclic`. Treat as depth 0 here to avoid
            // infinite recursion.
            return 0;
        }
        let max_child = self
            .graph
            .neighbors(node)
            .map(|n| self.longest_chain_from(n, visiting))
            .max()
            .unwrap_or(0);
        visiting.remove(&node);
        max_child + 1
    }

    /// Items transitively dependent on `failed_id` (i.e. items that
    /// (directly or indirectly) list `failed_id` as a dependency), via
    /// BFS over reversed edges.
    pub fn cascade(&self, failed_id: Id) -> Vec<Id> {
        let Some(&start) = self.index_of.get(&failed_id) else {
            return Vec::new();
        };
        let mut affected = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        seen.insert(start);
        while let Some(node) = queue.pop_front() {
            for neighbor in self
                .graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
            {
                if seen.insert(neighbor) {
                    affected.push(self.graph[neighbor]);
                    queue.push_back(neighbor);
                }
            }
        }
        affected
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
