//! Connected-component detection.
//!
//! Breadth-first search seeded from each unvisited node in ascending id
//! order. Components are therefore listed by their smallest member, and the
//! partition of a given graph is always the same value. O(V + E).

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use concord_types::AgentId;

use crate::error::TopologyError;
use crate::graph::InteractionGraph;

/// The connected components of an interaction graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentPartition {
    /// Components ordered by their smallest member.
    pub components: Vec<BTreeSet<AgentId>>,
}

impl ComponentPartition {
    /// Number of components.
    pub fn count(&self) -> usize {
        self.components.len()
    }

    /// Whether the graph has more than one component.
    pub fn is_fragmented(&self) -> bool {
        self.components.len() > 1
    }

    /// Index of the component containing `id`.
    pub fn component_of(&self, id: AgentId) -> Option<usize> {
        self.components.iter().position(|c| c.contains(&id))
    }

    /// Whether `a` and `b` are in the same component.
    pub fn connected(&self, a: AgentId, b: AgentId) -> bool {
        self.component_of(a)
            .is_some_and(|c| self.component_of(b) == Some(c))
    }

    /// Size of the largest component (zero for an empty graph).
    pub fn largest(&self) -> usize {
        self.components.iter().map(BTreeSet::len).max().unwrap_or(0)
    }
}

impl InteractionGraph {
    /// Partition the graph into connected components.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::CorruptedGraph`] if the adjacency structure
    /// is inconsistent. The caller must treat this as fatal.
    pub fn detect_fragmentation(&self) -> Result<ComponentPartition, TopologyError> {
        let mut visited: HashSet<AgentId> = HashSet::with_capacity(self.node_count());
        let mut components = Vec::new();

        for start in self.nodes() {
            if visited.contains(&start) {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut queue = VecDeque::new();
            visited.insert(start);
            queue.push_back(start);

            while let Some(current) = queue.pop_front() {
                component.insert(current);
                for neighbor in self.traversal_neighbors(current)? {
                    if visited.insert(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
            components.push(component);
        }

        Ok(ComponentPartition { components })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn set(ids: &[u64]) -> BTreeSet<AgentId> {
        ids.iter().copied().map(AgentId).collect()
    }

    #[test]
    fn two_disjoint_edges_give_two_components() {
        let mut g = InteractionGraph::new();
        g.update_edge(AgentId(1), AgentId(2), 1.0).unwrap();
        g.update_edge(AgentId(3), AgentId(4), 1.0).unwrap();
        let p = g.detect_fragmentation().unwrap();
        assert_eq!(p.count(), 2);
        assert_eq!(p.components, vec![set(&[1, 2]), set(&[3, 4])]);
        assert!(p.is_fragmented());
        assert!(p.connected(AgentId(1), AgentId(2)));
        assert!(!p.connected(AgentId(2), AgentId(3)));
    }

    #[test]
    fn isolated_nodes_are_singleton_components() {
        let mut g = InteractionGraph::new();
        g.add_node(AgentId(5));
        g.update_edge(AgentId(1), AgentId(2), 0.0).unwrap();
        let p = g.detect_fragmentation().unwrap();
        assert_eq!(p.components, vec![set(&[1, 2]), set(&[5])]);
        assert_eq!(p.largest(), 2);
    }

    #[test]
    fn empty_graph_has_no_components() {
        let p = InteractionGraph::new().detect_fragmentation().unwrap();
        assert_eq!(p.count(), 0);
        assert!(!p.is_fragmented());
        assert_eq!(p.largest(), 0);
    }

    #[test]
    fn long_chain_is_one_component() {
        let mut g = InteractionGraph::new();
        let chain: Vec<AgentId> = (0..=2_000).map(AgentId).collect();
        for pair in chain.windows(2) {
            if let [a, b] = pair {
                g.update_edge(*a, *b, 1.0).unwrap();
            }
        }
        g.add_node(AgentId(5_000));

        let p = g.detect_fragmentation().unwrap();
        assert_eq!(p.count(), 2);
        assert_eq!(p.largest(), 2_001);
        assert!(p.connected(AgentId(0), AgentId(2_000)));
        assert_eq!(p.components.last(), Some(&set(&[5_000])));
    }

    #[test]
    fn repeated_detection_is_identical() {
        let mut g = InteractionGraph::new();
        for (a, b) in [(7, 3), (3, 9), (1, 4), (8, 8), (2, 6), (6, 4)] {
            g.update_edge(AgentId(a), AgentId(b), 1.0).unwrap();
        }
        let first = g.detect_fragmentation().unwrap();
        for _ in 0..10 {
            assert_eq!(g.detect_fragmentation().unwrap(), first);
        }
        assert_eq!(first.components, vec![set(&[1, 2, 4, 6]), set(&[3, 7, 9]), set(&[8])]);
    }

    #[test]
    fn corrupted_adjacency_is_fatal() {
        let mut g = InteractionGraph::new();
        g.add_node(AgentId(2));
        g.insert_half_edge(AgentId(1), AgentId(2), 1.0);
        assert!(matches!(
            g.detect_fragmentation(),
            Err(TopologyError::CorruptedGraph { .. })
        ));
    }

    #[test]
    fn dangling_neighbor_is_fatal() {
        let mut g = InteractionGraph::new();
        g.insert_half_edge(AgentId(1), AgentId(2), 1.0);
        assert!(matches!(
            g.detect_fragmentation(),
            Err(TopologyError::CorruptedGraph { .. })
        ));
    }
}
