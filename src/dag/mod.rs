//! Generic directed graph
//!
//! The graph knows nothing about pipelines: it stores values under unique IDs
//! and keeps an adjacency list of edges keyed by the source ID. Both the step
//! graph of a pipeline and the pipeline graph of a collection are built on it.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors raised while building or querying a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("node with ID already exists. id: {0}")]
    DuplicateId(i64),

    #[error("node with ID not found. id: {0}")]
    NotFound(i64),
}

/// What a visitor wants the traversal to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep going into this node's successors
    Continue,
    /// Don't descend any further along this branch
    Stop,
}

/// A value stored in the graph under a unique ID
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub id: i64,
    pub value: T,
}

/// A directed edge between two node IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: i64,
    pub to: i64,
}

/// Directed graph with ordered nodes and an adjacency list
///
/// No cycle detection happens implicitly; callers that need an acyclic graph
/// ask for it with [`Graph::find_cycle`].
#[derive(Debug, Clone)]
pub struct Graph<T> {
    nodes: Vec<Node<T>>,
    edges: HashMap<i64, Vec<Edge>>,
}

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Graph<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: HashMap::new(),
        }
    }

    /// Add a node. Fails without touching the graph if the ID is taken.
    pub fn add_node(&mut self, id: i64, value: T) -> Result<(), DagError> {
        if self.contains(id) {
            return Err(DagError::DuplicateId(id));
        }

        self.nodes.push(Node { id, value });
        Ok(())
    }

    /// Add an edge `from -> to`. Both nodes must already exist.
    ///
    /// Duplicate edges are accepted as-is.
    pub fn add_edge(&mut self, from: i64, to: i64) -> Result<(), DagError> {
        if !self.contains(from) {
            return Err(DagError::NotFound(from));
        }
        if !self.contains(to) {
            return Err(DagError::NotFound(to));
        }

        self.edges.entry(from).or_default().push(Edge { from, to });
        Ok(())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn has_edge(&self, from: i64, to: i64) -> bool {
        self.edges
            .get(&from)
            .is_some_and(|edges| edges.iter().any(|e| e.to == to))
    }

    /// Look up a single node
    pub fn node(&self, id: i64) -> Result<&Node<T>, DagError> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .ok_or(DagError::NotFound(id))
    }

    pub fn node_mut(&mut self, id: i64) -> Result<&mut Node<T>, DagError> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(DagError::NotFound(id))
    }

    /// Look up several nodes at once. Fails on the first missing ID.
    pub fn node_list(&self, ids: &[i64]) -> Result<Vec<&Node<T>>, DagError> {
        ids.iter().map(|id| self.node(*id)).collect()
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }

    pub fn edges(&self) -> &HashMap<i64, Vec<Edge>> {
        &self.edges
    }

    /// Edges leaving `id`, in the order they were added
    pub fn edges_from(&self, id: i64) -> &[Edge] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes directly reachable from `id`, in edge order
    pub fn adj(&self, id: i64) -> Vec<&Node<T>> {
        self.edges_from(id)
            .iter()
            .filter_map(|e| self.node(e.to).ok())
            .collect()
    }

    /// IDs of every node with an edge into `id`, without duplicates
    pub fn predecessors(&self, id: i64) -> Vec<i64> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .filter(|n| self.has_edge(n.id, id))
            .filter(|n| seen.insert(n.id))
            .map(|n| n.id)
            .collect()
    }

    pub fn clear_edges(&mut self) {
        self.edges.clear();
    }

    /// Preorder depth-first traversal starting at `start`.
    ///
    /// Every reachable node is visited at most once per call. Returning
    /// [`Visit::Stop`] skips the node's successors; returning an error aborts
    /// the whole traversal.
    pub fn depth_first_search<E, F>(&self, start: i64, mut visit: F) -> Result<(), E>
    where
        E: From<DagError>,
        F: FnMut(&Node<T>) -> Result<Visit, E>,
    {
        self.node(start)?;

        let mut visited = HashSet::new();
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }

            let node = self.node(id)?;
            if visit(node)? == Visit::Stop {
                continue;
            }

            for edge in self.edges_from(id).iter().rev() {
                if !visited.contains(&edge.to) {
                    stack.push(edge.to);
                }
            }
        }

        Ok(())
    }

    /// Depth-first traversal that enters a node only after every edge into it
    /// from a reachable node has been followed.
    ///
    /// Producers are therefore always visited before their consumers. Nodes
    /// below a [`Visit::Stop`] whose other predecessors never complete are not
    /// visited, and nodes on a cycle are never reached.
    pub fn ordered_search<E, F>(&self, start: i64, mut visit: F) -> Result<(), E>
    where
        E: From<DagError>,
        F: FnMut(&Node<T>) -> Result<Visit, E>,
    {
        self.node(start)?;

        let reachable = self.reachable_from(start);
        let mut remaining: HashMap<i64, usize> = HashMap::new();
        for from in &reachable {
            for edge in self.edges_from(*from) {
                *remaining.entry(edge.to).or_default() += 1;
            }
        }

        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if visit(node)? == Visit::Stop {
                continue;
            }

            for edge in self.edges_from(id).iter().rev() {
                if let Some(count) = remaining.get_mut(&edge.to) {
                    *count -= 1;
                    if *count == 0 {
                        stack.push(edge.to);
                    }
                }
            }
        }

        Ok(())
    }

    fn reachable_from(&self, start: i64) -> HashSet<i64> {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.edges_from(id).iter().map(|e| e.to));
            }
        }
        seen
    }

    /// Find a cycle anywhere in the graph, returned as the IDs along it
    pub fn find_cycle(&self) -> Option<Vec<i64>> {
        let mut done = HashSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if done.contains(&node.id) {
                continue;
            }
            if let Some(cycle) = self.cycle_from(node.id, &mut done, &mut path) {
                return Some(cycle);
            }
        }

        None
    }

    fn cycle_from(&self, id: i64, done: &mut HashSet<i64>, path: &mut Vec<i64>) -> Option<Vec<i64>> {
        if let Some(pos) = path.iter().position(|p| *p == id) {
            return Some(path[pos..].to_vec());
        }
        if done.contains(&id) {
            return None;
        }

        path.push(id);
        for edge in self.edges_from(id) {
            if let Some(cycle) = self.cycle_from(edge.to, done, path) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(id);

        None
    }
}
