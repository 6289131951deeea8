//! Resonance: diffusion of a scalar signal outward from one agent.
//!
//! The signal spreads breadth-first along edges and is attenuated once per
//! hop. Every node reachable from the source receives exactly one value, the
//! one for its shortest hop distance. Nodes in other components receive
//! nothing and are absent from the result.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use concord_types::AgentId;

use crate::error::TopologyError;
use crate::graph::InteractionGraph;

/// Attenuated signal per reached node.
pub type ResonanceMap = BTreeMap<AgentId, f64>;

/// How a signal weakens per hop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attenuation {
    /// `signal * factor^hops`.
    Geometric {
        /// Per-hop multiplier in `(0, 1]`.
        factor: f64,
    },
}

impl Attenuation {
    /// Geometric attenuation with a validated factor.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidParameter`] if `factor` is outside `(0, 1]`.
    pub fn geometric(factor: f64) -> Result<Self, TopologyError> {
        let attenuation = Self::Geometric { factor };
        attenuation.validate()?;
        Ok(attenuation)
    }

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidParameter`] for an out-of-range factor.
    pub fn validate(&self) -> Result<(), TopologyError> {
        match *self {
            Self::Geometric { factor } => {
                if factor.is_finite() && factor > 0.0 && factor <= 1.0 {
                    Ok(())
                } else {
                    Err(TopologyError::InvalidParameter {
                        name: "attenuation factor",
                        value: factor,
                    })
                }
            }
        }
    }

    /// Signal one hop further out than `signal`.
    fn step(&self, signal: f64) -> f64 {
        match *self {
            Self::Geometric { factor } => signal * factor,
        }
    }
}

impl Default for Attenuation {
    fn default() -> Self {
        Self::Geometric { factor: 0.5 }
    }
}

impl InteractionGraph {
    /// Diffuse `signal` from `source` to every reachable node.
    ///
    /// The source itself receives the unattenuated signal. An isolated source
    /// yields a single-entry map.
    ///
    /// # Errors
    ///
    /// - [`TopologyError::UnknownNode`] if `source` is not in the graph
    /// - [`TopologyError::InvalidParameter`] for a non-finite signal or an
    ///   invalid attenuation
    /// - [`TopologyError::CorruptedGraph`] if traversal finds inconsistent adjacency
    pub fn propagate_resonance(
        &self,
        source: AgentId,
        signal: f64,
        attenuation: Attenuation,
    ) -> Result<ResonanceMap, TopologyError> {
        if !self.contains_node(source) {
            return Err(TopologyError::UnknownNode(source));
        }
        if !signal.is_finite() {
            return Err(TopologyError::InvalidParameter {
                name: "resonance signal",
                value: signal,
            });
        }
        attenuation.validate()?;

        let mut reached = ResonanceMap::new();
        let mut queue = VecDeque::new();
        reached.insert(source, signal);
        queue.push_back((source, signal));

        while let Some((current, strength)) = queue.pop_front() {
            let next = attenuation.step(strength);
            for neighbor in self.traversal_neighbors(current)? {
                if let std::collections::btree_map::Entry::Vacant(slot) = reached.entry(neighbor) {
                    slot.insert(next);
                    queue.push_back((neighbor, next));
                }
            }
        }

        Ok(reached)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn chain() -> InteractionGraph {
        let mut g = InteractionGraph::new();
        g.update_edge(AgentId(1), AgentId(2), 1.0).unwrap();
        g.update_edge(AgentId(2), AgentId(3), 1.0).unwrap();
        g.update_edge(AgentId(3), AgentId(4), 1.0).unwrap();
        g.update_edge(AgentId(8), AgentId(9), 1.0).unwrap();
        g
    }

    #[test]
    fn signal_halves_per_hop() {
        let map = chain()
            .propagate_resonance(AgentId(1), 8.0, Attenuation::geometric(0.5).unwrap())
            .unwrap();
        let values: Vec<(u64, f64)> = map.iter().map(|(k, &v)| (k.0, v)).collect();
        assert_eq!(values, vec![(1, 8.0), (2, 4.0), (3, 2.0), (4, 1.0)]);
    }

    #[test]
    fn other_components_are_absent() {
        let map = chain()
            .propagate_resonance(AgentId(9), 1.0, Attenuation::default())
            .unwrap();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![AgentId(8), AgentId(9)]);
    }

    #[test]
    fn shortest_hop_distance_wins() {
        let mut g = chain();
        g.update_edge(AgentId(1), AgentId(4), 1.0).unwrap();
        let map = g
            .propagate_resonance(AgentId(1), 1.0, Attenuation::geometric(0.5).unwrap())
            .unwrap();
        assert_eq!(map.get(&AgentId(4)), Some(&0.5));
        assert_eq!(map.get(&AgentId(3)), Some(&0.25));
    }

    #[test]
    fn isolated_source_reaches_only_itself() {
        let mut g = InteractionGraph::new();
        g.add_node(AgentId(4));
        let map = g
            .propagate_resonance(AgentId(4), 2.0, Attenuation::default())
            .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&AgentId(4)), Some(&2.0));
    }

    #[test]
    fn unknown_source_is_an_error() {
        let err = chain()
            .propagate_resonance(AgentId(42), 1.0, Attenuation::default())
            .unwrap_err();
        assert_eq!(err, TopologyError::UnknownNode(AgentId(42)));
    }

    #[test]
    fn invalid_factor_is_rejected() {
        assert!(Attenuation::geometric(0.0).is_err());
        assert!(Attenuation::geometric(1.01).is_err());
        assert!(Attenuation::geometric(1.0).is_ok());
    }

    #[test]
    fn attenuation_deserializes_from_tagged_form() {
        let a: Attenuation =
            serde_json::from_value(serde_json::json!({"kind": "geometric", "factor": 0.25}))
                .unwrap();
        assert_eq!(a, Attenuation::Geometric { factor: 0.25 });
    }
}
