//! Diagram builder and the compiled, immutable form
//!
//! [`Diagram`] is the mutable construction API; [`Diagram::compile`]
//! validates the structure and freezes it into a [`CompiledDiagram`] with
//! prebuilt incoming/outgoing edge indexes and a deterministic topological
//! index used to order batches. A compiled diagram is shared read-only
//! across executions and never mutated after hand-off.

use super::{Edge, Node, NodeId, NodeType, CONDFALSE_HANDLE, CONDTRUE_HANDLE};
use crate::error::{EngineError, Result};
use std::collections::HashMap;

/// Mutable diagram under construction
#[derive(Debug, Clone, Default)]
pub struct Diagram {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Diagram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Later nodes with a duplicate id are rejected at compile.
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Add an edge between declared handles
    pub fn add_edge(&mut self, edge: Edge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    /// Shorthand: connect `source` default output to `target` default input
    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) -> &mut Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    /// Validate and freeze into an executable [`CompiledDiagram`]
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when:
    /// - a node id is duplicated
    /// - an edge endpoint references a missing node
    /// - a `start` node has incoming edges, or an `endpoint` node outgoing
    /// - a condition node's outgoing handle is not `condtrue`/`condfalse`
    ///
    /// Cycles are legal: they express iteration loops.
    pub fn compile(self) -> Result<CompiledDiagram> {
        let mut nodes: HashMap<NodeId, Node> = HashMap::with_capacity(self.nodes.len());
        let mut order: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            if nodes.contains_key(&node.id) {
                return Err(EngineError::Validation(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            order.push(node.id.clone());
            nodes.insert(node.id.clone(), node);
        }

        for edge in &self.edges {
            let source = nodes.get(&edge.source).ok_or_else(|| {
                EngineError::Validation(format!("edge source '{}' does not exist", edge.source))
            })?;
            let target = nodes.get(&edge.target).ok_or_else(|| {
                EngineError::Validation(format!("edge target '{}' does not exist", edge.target))
            })?;

            if target.node_type == NodeType::Start {
                return Err(EngineError::Validation(format!(
                    "start node '{}' cannot have incoming edges",
                    target.id
                )));
            }
            if source.node_type == NodeType::Endpoint {
                return Err(EngineError::Validation(format!(
                    "endpoint node '{}' cannot have outgoing edges",
                    source.id
                )));
            }
            if source.node_type == NodeType::Condition
                && edge.source_handle != CONDTRUE_HANDLE
                && edge.source_handle != CONDFALSE_HANDLE
            {
                return Err(EngineError::Validation(format!(
                    "condition node '{}' output handle must be '{}' or '{}', got '{}'",
                    source.id, CONDTRUE_HANDLE, CONDFALSE_HANDLE, edge.source_handle
                )));
            }
        }

        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (idx, edge) in self.edges.iter().enumerate() {
            incoming.entry(edge.target.clone()).or_default().push(idx);
            outgoing.entry(edge.source.clone()).or_default().push(idx);
        }

        let topo_index = topological_index(&order, &self.edges);

        Ok(CompiledDiagram {
            nodes,
            node_order: order,
            edges: self.edges,
            incoming,
            outgoing,
            topo_index,
        })
    }
}

/// Cycle-tolerant deterministic topological index
///
/// Kahn's algorithm with stable tie-breaking by insertion order. Nodes left
/// over by cycles are appended in insertion order after the acyclic prefix,
/// so every node gets an index and equal diagrams index identically.
fn topological_index(order: &[NodeId], edges: &[Edge]) -> HashMap<NodeId, usize> {
    let mut in_degree: HashMap<&str, usize> = order.iter().map(|id| (id.as_str(), 0)).collect();
    for edge in edges {
        if let Some(d) = in_degree.get_mut(edge.target.as_str()) {
            *d += 1;
        }
    }

    let mut index = HashMap::with_capacity(order.len());
    let mut remaining: Vec<&NodeId> = order.iter().collect();
    let mut next = 0usize;

    while !remaining.is_empty() {
        let position = remaining
            .iter()
            .position(|id| in_degree.get(id.as_str()).copied().unwrap_or(0) == 0)
            // Cycle: break it at the first remaining node
            .unwrap_or(0);
        let id = remaining.remove(position);
        index.insert(id.clone(), next);
        next += 1;
        for edge in edges {
            if edge.source == *id {
                if let Some(d) = in_degree.get_mut(edge.target.as_str()) {
                    *d = d.saturating_sub(1);
                }
            }
        }
    }
    index
}

/// Immutable, validated diagram shared by executions
#[derive(Debug, Clone)]
pub struct CompiledDiagram {
    nodes: HashMap<NodeId, Node>,
    node_order: Vec<NodeId>,
    edges: Vec<Edge>,
    incoming: HashMap<NodeId, Vec<usize>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    topo_index: HashMap<NodeId, usize>,
}

impl CompiledDiagram {
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Node ids in insertion order
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_order
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges pointing at a node, in diagram insertion order
    pub fn incoming_edges(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    /// Edges leaving a node, in diagram insertion order
    pub fn outgoing_edges(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes().filter(move |n| n.node_type == node_type)
    }

    pub fn start_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes_of_type(NodeType::Start)
    }

    pub fn endpoint_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes_of_type(NodeType::Endpoint)
    }

    /// Deterministic scheduling rank: producers rank before their consumers
    /// wherever the graph is acyclic
    pub fn topo_rank(&self, id: &str) -> usize {
        self.topo_index.get(id).copied().unwrap_or(usize::MAX)
    }
}
