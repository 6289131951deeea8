//! Interaction graph: agents as nodes, accumulated interaction strength as
//! undirected weighted edges.
//!
//! Adjacency is stored symmetrically as `BTreeMap<AgentId, BTreeMap<AgentId, f64>>`:
//! an edge `a -- b` appears under both endpoints with the same weight. Ordered
//! maps give every traversal a fixed visiting order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use concord_types::AgentId;

use crate::error::TopologyError;

/// Persisted form of an [`InteractionGraph`].
///
/// Edges are listed once, as `[a, b, weight]` with `a <= b`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    /// Every node, ascending.
    pub nodes: Vec<AgentId>,
    /// Every edge once, ordered by endpoints.
    pub edges: Vec<(AgentId, AgentId, f64)>,
}

/// Undirected weighted graph of agent interactions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionGraph {
    adjacency: BTreeMap<AgentId, BTreeMap<AgentId, f64>>,
}

impl InteractionGraph {
    /// Create an empty graph.
    pub const fn new() -> Self {
        Self {
            adjacency: BTreeMap::new(),
        }
    }

    // -------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------

    /// Register a node. Returns `false` if it was already present.
    pub fn add_node(&mut self, id: AgentId) -> bool {
        if self.adjacency.contains_key(&id) {
            return false;
        }
        self.adjacency.insert(id, BTreeMap::new());
        true
    }

    /// Remove a node and every edge touching it.
    ///
    /// Returns `false` if the node was not present.
    pub fn remove_node(&mut self, id: AgentId) -> bool {
        let Some(neighbors) = self.adjacency.remove(&id) else {
            return false;
        };
        for neighbor in neighbors.keys() {
            if let Some(back) = self.adjacency.get_mut(neighbor) {
                back.remove(&id);
            }
        }
        true
    }

    /// Whether `id` is a node of the graph.
    pub fn contains_node(&self, id: AgentId) -> bool {
        self.adjacency.contains_key(&id)
    }

    /// All nodes in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.adjacency.keys().copied()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    // -------------------------------------------------------------------
    // Edges
    // -------------------------------------------------------------------

    /// Create or overwrite the edge `a -- b`, registering missing endpoints.
    ///
    /// `a == b` is accepted and stored as a self-loop.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidWeight`] if `weight` is negative or not
    /// finite; the graph is unchanged.
    pub fn update_edge(
        &mut self,
        a: AgentId,
        b: AgentId,
        weight: f64,
    ) -> Result<(), TopologyError> {
        check_weight(a, b, weight)?;
        self.adjacency.entry(a).or_default().insert(b, weight);
        self.adjacency.entry(b).or_default().insert(a, weight);
        Ok(())
    }

    /// Add `delta` to the weight of `a -- b`, creating the edge at `delta`
    /// if absent. Returns the new weight.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidWeight`] if `delta` or the resulting
    /// weight is negative or not finite.
    pub fn record_interaction(
        &mut self,
        a: AgentId,
        b: AgentId,
        delta: f64,
    ) -> Result<f64, TopologyError> {
        check_weight(a, b, delta)?;
        let updated = self.weight(a, b).unwrap_or(0.0) + delta;
        self.update_edge(a, b, updated)?;
        Ok(updated)
    }

    /// Remove the edge `a -- b`. Returns the removed weight, if any.
    pub fn remove_edge(&mut self, a: AgentId, b: AgentId) -> Option<f64> {
        let removed = self.adjacency.get_mut(&a).and_then(|n| n.remove(&b));
        if let Some(back) = self.adjacency.get_mut(&b) {
            back.remove(&a);
        }
        removed
    }

    /// Weight of `a -- b`, if the edge exists.
    pub fn weight(&self, a: AgentId, b: AgentId) -> Option<f64> {
        self.adjacency.get(&a).and_then(|n| n.get(&b)).copied()
    }

    /// Neighbors of `id` with edge weights, ascending by id.
    pub fn neighbors(&self, id: AgentId) -> Vec<(AgentId, f64)> {
        self.adjacency
            .get(&id)
            .map(|n| n.iter().map(|(&peer, &w)| (peer, w)).collect())
            .unwrap_or_default()
    }

    /// Number of undirected edges (a self-loop counts once).
    pub fn edge_count(&self) -> usize {
        self.adjacency
            .iter()
            .map(|(a, n)| n.keys().filter(|b| a <= *b).count())
            .sum()
    }

    /// Every edge once as `(a, b, weight)` with `a <= b`, ordered by endpoints.
    pub fn edges(&self) -> Vec<(AgentId, AgentId, f64)> {
        self.adjacency
            .iter()
            .flat_map(|(&a, n)| {
                n.iter()
                    .filter(move |(b, _)| a <= **b)
                    .map(move |(&b, &w)| (a, b, w))
            })
            .collect()
    }

    /// Age every edge by `factor` and drop edges whose weight falls below
    /// `prune_below`. Nodes are kept. Returns the number of pruned edges.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidParameter`] if `factor` is outside
    /// `(0, 1]` or `prune_below` is negative or not finite.
    pub fn decay(&mut self, factor: f64, prune_below: f64) -> Result<usize, TopologyError> {
        if !(factor.is_finite() && factor > 0.0 && factor <= 1.0) {
            return Err(TopologyError::InvalidParameter {
                name: "edge decay factor",
                value: factor,
            });
        }
        if !(prune_below.is_finite() && prune_below >= 0.0) {
            return Err(TopologyError::InvalidParameter {
                name: "prune threshold",
                value: prune_below,
            });
        }

        for neighbors in self.adjacency.values_mut() {
            for w in neighbors.values_mut() {
                *w *= factor;
            }
        }

        let weak: Vec<(AgentId, AgentId)> = self
            .edges()
            .into_iter()
            .filter(|&(_, _, w)| w < prune_below)
            .map(|(a, b, _)| (a, b))
            .collect();
        for &(a, b) in &weak {
            self.remove_edge(a, b);
        }
        Ok(weak.len())
    }

    // -------------------------------------------------------------------
    // Traversal support
    // -------------------------------------------------------------------

    /// Neighbors of `id` for traversal, checking adjacency consistency.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::CorruptedGraph`] if a neighbor is not a node,
    /// the reverse edge is missing or differs, or a weight is not finite.
    pub(crate) fn traversal_neighbors(&self, id: AgentId) -> Result<Vec<AgentId>, TopologyError> {
        let Some(neighbors) = self.adjacency.get(&id) else {
            return Err(TopologyError::UnknownNode(id));
        };
        let mut out = Vec::with_capacity(neighbors.len());
        for (&peer, &w) in neighbors {
            if !w.is_finite() || w < 0.0 {
                return Err(TopologyError::CorruptedGraph {
                    reason: format!("edge {id} -- {peer} has weight {w}"),
                });
            }
            let Some(back) = self.adjacency.get(&peer) else {
                return Err(TopologyError::CorruptedGraph {
                    reason: format!("edge {id} -- {peer} points to a missing node"),
                });
            };
            let symmetric = back.get(&id).is_some_and(|r| r.to_bits() == w.to_bits());
            if !symmetric {
                return Err(TopologyError::CorruptedGraph {
                    reason: format!("edge {id} -- {peer} is not symmetric"),
                });
            }
            out.push(peer);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------

    /// Capture the graph in persisted form.
    pub fn to_record(&self) -> GraphRecord {
        GraphRecord {
            nodes: self.nodes().collect(),
            edges: self.edges(),
        }
    }

    /// Rebuild a graph from its persisted form.
    ///
    /// # Errors
    ///
    /// - [`TopologyError::UnknownNode`] if an edge references an unlisted node
    /// - [`TopologyError::InvalidWeight`] for a negative or non-finite weight
    pub fn from_record(record: &GraphRecord) -> Result<Self, TopologyError> {
        let mut graph = Self::new();
        for &node in &record.nodes {
            graph.add_node(node);
        }
        for &(a, b, w) in &record.edges {
            for end in [a, b] {
                if !graph.contains_node(end) {
                    return Err(TopologyError::UnknownNode(end));
                }
            }
            graph.update_edge(a, b, w)?;
        }
        Ok(graph)
    }

    #[cfg(test)]
    pub(crate) fn insert_half_edge(&mut self, a: AgentId, b: AgentId, weight: f64) {
        self.adjacency.entry(a).or_default().insert(b, weight);
    }
}

fn check_weight(a: AgentId, b: AgentId, weight: f64) -> Result<(), TopologyError> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(TopologyError::InvalidWeight { a, b, weight })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn id(n: u64) -> AgentId {
        AgentId(n)
    }

    #[test]
    fn update_edge_is_symmetric_and_registers_nodes() {
        let mut g = InteractionGraph::new();
        g.update_edge(id(1), id(2), 0.5).unwrap();
        assert_eq!(g.weight(id(1), id(2)), Some(0.5));
        assert_eq!(g.weight(id(2), id(1)), Some(0.5));
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn negative_or_nan_weight_is_rejected() {
        let mut g = InteractionGraph::new();
        assert!(matches!(
            g.update_edge(id(1), id(2), -0.1),
            Err(TopologyError::InvalidWeight { .. })
        ));
        assert!(g.update_edge(id(1), id(2), f64::NAN).is_err());
        assert_eq!(g.node_count(), 0);
    }

    #[test]
    fn self_loop_counts_once() {
        let mut g = InteractionGraph::new();
        g.update_edge(id(3), id(3), 1.0).unwrap();
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.edges(), vec![(id(3), id(3), 1.0)]);
    }

    #[test]
    fn record_interaction_accumulates() {
        let mut g = InteractionGraph::new();
        g.record_interaction(id(1), id(2), 0.25).unwrap();
        let w = g.record_interaction(id(2), id(1), 0.5).unwrap();
        assert_eq!(w, 0.75);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut g = InteractionGraph::new();
        g.update_edge(id(1), id(2), 1.0).unwrap();
        g.update_edge(id(2), id(3), 1.0).unwrap();
        assert!(g.remove_node(id(2)));
        assert_eq!(g.edge_count(), 0);
        assert!(g.neighbors(id(1)).is_empty());
        assert!(!g.remove_node(id(2)));
    }

    #[test]
    fn decay_scales_and_prunes() {
        let mut g = InteractionGraph::new();
        g.update_edge(id(1), id(2), 1.0).unwrap();
        g.update_edge(id(3), id(4), 0.1).unwrap();
        let pruned = g.decay(0.5, 0.1).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(g.weight(id(1), id(2)), Some(0.5));
        assert_eq!(g.weight(id(3), id(4)), None);
        assert_eq!(g.node_count(), 4);
    }

    #[test]
    fn decay_rejects_bad_factor() {
        let mut g = InteractionGraph::new();
        assert!(g.decay(0.0, 0.0).is_err());
        assert!(g.decay(1.5, 0.0).is_err());
        assert!(g.decay(0.5, -1.0).is_err());
    }

    #[test]
    fn record_round_trip() {
        let mut g = InteractionGraph::new();
        g.add_node(id(9));
        g.update_edge(id(1), id(2), 0.3).unwrap();
        g.update_edge(id(2), id(5), 1.7).unwrap();
        let record = g.to_record();
        assert_eq!(record.nodes, vec![id(1), id(2), id(5), id(9)]);
        let back = InteractionGraph::from_record(&record).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn record_serializes_edges_as_triples() {
        let mut g = InteractionGraph::new();
        g.update_edge(id(2), id(1), 0.5).unwrap();
        let value = serde_json::to_value(g.to_record()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"nodes": [1, 2], "edges": [[1, 2, 0.5]]})
        );
    }

    #[test]
    fn from_record_rejects_edge_to_unknown_node() {
        let record = GraphRecord {
            nodes: vec![id(1)],
            edges: vec![(id(1), id(2), 1.0)],
        };
        assert_eq!(
            InteractionGraph::from_record(&record),
            Err(TopologyError::UnknownNode(id(2)))
        );
    }

    #[test]
    fn traversal_detects_asymmetry() {
        let mut g = InteractionGraph::new();
        g.add_node(id(1));
        g.add_node(id(2));
        g.insert_half_edge(id(1), id(2), 1.0);
        assert!(matches!(
            g.traversal_neighbors(id(1)),
            Err(TopologyError::CorruptedGraph { .. })
        ));
    }
}
