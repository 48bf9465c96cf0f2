//! Knowledge Graph Index
//!
//! Derived adjacency over GRAPH-tier relationships. The index holds
//! non-owning `(id, tier)` references to entities owned by their tier
//! backends and can always be rebuilt from the GRAPH backend, which stays the
//! source of truth.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{Sensitivity, Tier};

/// Non-owning reference to a stored entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: String,
    pub tier: Tier,
}

impl NodeRef {
    pub fn new(id: impl Into<String>, tier: Tier) -> Self {
        Self {
            id: id.into(),
            tier,
        }
    }
}

/// Relationship as held by the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEdge {
    pub edge_id: String,
    pub from: NodeRef,
    pub to: NodeRef,
    pub relation_type: String,
    pub strength: f64,
    pub bidirectional: bool,
    pub sensitivity: Sensitivity,
    /// Relationship version this entry was built from
    pub version: u64,
}

/// Which end of an edge a node sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    /// Node is the edge's `from` end
    Outgoing,
    /// Node is the edge's `to` end
    Incoming,
}

/// One-hop neighbour of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node: NodeRef,
    pub edge_id: String,
    pub relation_type: String,
    pub strength: f64,
    pub direction: EdgeDirection,
    /// Whether the edge can be walked from this node towards `node`
    pub traversable: bool,
}

/// Simple path between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    /// Visited nodes, start and end included
    pub nodes: Vec<NodeRef>,
    /// Edge ids walked, one fewer than `nodes`
    pub edges: Vec<String>,
    pub total_strength: f64,
}

impl GraphPath {
    /// Number of edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }
}

/// Adjacency index over relationships
#[derive(Debug, Default)]
pub struct GraphIndex {
    edges: HashMap<String, IndexedEdge>,
    /// node id -> (edge id, node is the `to` end)
    adjacency: HashMap<String, Vec<(String, bool)>>,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a full edge set
    pub fn from_edges(edges: impl IntoIterator<Item = IndexedEdge>) -> Self {
        let mut index = Self::new();
        for edge in edges {
            index.insert(edge);
        }
        index
    }

    pub fn insert(&mut self, edge: IndexedEdge) {
        if self.edges.contains_key(&edge.edge_id) {
            return;
        }
        self.adjacency
            .entry(edge.from.id.clone())
            .or_default()
            .push((edge.edge_id.clone(), false));
        self.adjacency
            .entry(edge.to.id.clone())
            .or_default()
            .push((edge.edge_id.clone(), true));
        self.edges.insert(edge.edge_id.clone(), edge);
    }

    pub fn remove(&mut self, edge_id: &str) -> Option<IndexedEdge> {
        let edge = self.edges.remove(edge_id)?;
        for node in [&edge.from.id, &edge.to.id] {
            if let Some(list) = self.adjacency.get_mut(node) {
                list.retain(|(id, _)| id != edge_id);
                if list.is_empty() {
                    self.adjacency.remove(node);
                }
            }
        }
        Some(edge)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn contains_edge(&self, edge_id: &str) -> bool {
        self.edges.contains_key(edge_id)
    }

    /// True when the index holds exactly the `live` edges, each at the
    /// given latest version
    pub fn matches_versions(&self, live: &HashMap<String, u64>) -> bool {
        self.edges.len() == live.len()
            && live.iter().all(|(id, version)| {
                self.edges
                    .get(id)
                    .is_some_and(|edge| edge.version == *version)
            })
    }

    /// Edges that may be walked from `node`, with the node they lead to
    fn traversals<'a>(&'a self, node: &str) -> impl Iterator<Item = (&'a IndexedEdge, &'a NodeRef)> {
        self.adjacency
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|(edge_id, node_is_to)| {
                let edge = self.edges.get(edge_id)?;
                match (*node_is_to, edge.bidirectional) {
                    (false, _) => Some((edge, &edge.to)),
                    (true, true) => Some((edge, &edge.from)),
                    (true, false) => None,
                }
            })
    }

    /// Every edge touching `node`
    pub fn neighbors(&self, node: &str, visible: impl Fn(&IndexedEdge) -> bool) -> Vec<Neighbor> {
        self.adjacency
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|(edge_id, node_is_to)| {
                let edge = self.edges.get(edge_id)?;
                if !visible(edge) {
                    return None;
                }
                let (other, direction, traversable) = if *node_is_to {
                    (&edge.from, EdgeDirection::Incoming, edge.bidirectional)
                } else {
                    (&edge.to, EdgeDirection::Outgoing, true)
                };
                Some(Neighbor {
                    node: other.clone(),
                    edge_id: edge.edge_id.clone(),
                    relation_type: edge.relation_type.clone(),
                    strength: edge.strength,
                    direction,
                    traversable,
                })
            })
            .collect()
    }

    /// All simple paths from `start` to `end` of at most `max_depth` edges.
    ///
    /// Breadth-first over partial paths; a path never revisits a node.
    /// Ordered by length ascending, then cumulative strength descending, then
    /// node and edge ids for a stable order.
    pub fn find_paths(
        &self,
        start: &str,
        end: &str,
        max_depth: usize,
        visible: impl Fn(&IndexedEdge) -> bool,
    ) -> Vec<GraphPath> {
        if start == end || max_depth == 0 {
            return Vec::new();
        }
        let Some(start_ref) = self.node_ref(start) else {
            return Vec::new();
        };

        let mut paths = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(GraphPath {
            nodes: vec![start_ref],
            edges: Vec::new(),
            total_strength: 0.0,
        });

        while let Some(partial) = queue.pop_front() {
            let Some(current) = partial.nodes.last() else {
                continue;
            };
            for (edge, next) in self.traversals(&current.id) {
                if !visible(edge) || partial.node_ids().any(|id| id == next.id) {
                    continue;
                }
                let mut extended = partial.clone();
                extended.nodes.push(next.clone());
                extended.edges.push(edge.edge_id.clone());
                extended.total_strength += edge.strength;

                if next.id == end {
                    paths.push(extended);
                } else if extended.len() < max_depth {
                    queue.push_back(extended);
                }
            }
        }

        paths.sort_by(|a, b| {
            a.len()
                .cmp(&b.len())
                .then_with(|| b.total_strength.total_cmp(&a.total_strength))
                .then_with(|| a.node_ids().cmp(b.node_ids()))
                .then_with(|| a.edges.cmp(&b.edges))
        });
        paths
    }

    fn node_ref(&self, id: &str) -> Option<NodeRef> {
        let (edge_id, node_is_to) = self.adjacency.get(id)?.first()?;
        let edge = self.edges.get(edge_id)?;
        Some(if *node_is_to {
            edge.to.clone()
        } else {
            edge.from.clone()
        })
    }
}
