//! Periodic topology checks over an owned [`InteractionGraph`].
//!
//! The manager is the only owner of the graph. The orchestrator calls into it
//! from its topology phase: record interactions, diffuse resonance, run the
//! scheduled fragmentation check, then age the edges.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use concord_types::AgentId;

use crate::error::TopologyError;
use crate::graph::InteractionGraph;
use crate::partition::ComponentPartition;
use crate::resonance::{Attenuation, ResonanceMap};

/// Change in connectivity between two consecutive checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyTransition {
    /// Component count did not change.
    Unchanged,
    /// A connected graph split.
    Fragmented {
        /// Components after the split.
        components: usize,
    },
    /// A fragmented graph became connected again.
    Recovered,
    /// Still fragmented, with a different number of components.
    Reshaped {
        /// Components at the previous check.
        from: usize,
        /// Components now.
        to: usize,
    },
}

/// Result of one scheduled fragmentation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyCheck {
    /// Epoch at which the check ran.
    pub epoch: u64,
    /// Components found.
    pub partition: ComponentPartition,
    /// Change relative to the previous check.
    pub transition: TopologyTransition,
}

/// Owner of the interaction graph and its check schedule.
#[derive(Debug, Clone)]
pub struct TopologyManager {
    graph: InteractionGraph,
    check_interval: u64,
    attenuation: Attenuation,
    edge_decay: f64,
    prune_below: f64,
    last_partition: Option<ComponentPartition>,
}

impl TopologyManager {
    /// Create a manager over an empty graph.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidParameter`] if `check_interval` is
    /// zero, `attenuation` is invalid, `edge_decay` is outside `(0, 1]`, or
    /// `prune_below` is negative.
    pub fn new(
        check_interval: u64,
        attenuation: Attenuation,
        edge_decay: f64,
        prune_below: f64,
    ) -> Result<Self, TopologyError> {
        Self::with_graph(
            InteractionGraph::new(),
            check_interval,
            attenuation,
            edge_decay,
            prune_below,
        )
    }

    /// Create a manager over an existing graph (restore path).
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_graph(
        graph: InteractionGraph,
        check_interval: u64,
        attenuation: Attenuation,
        edge_decay: f64,
        prune_below: f64,
    ) -> Result<Self, TopologyError> {
        if check_interval == 0 {
            return Err(TopologyError::InvalidParameter {
                name: "check interval",
                value: 0.0,
            });
        }
        attenuation.validate()?;
        // Validates both decay parameters without touching any edge.
        InteractionGraph::new().decay(edge_decay, prune_below)?;
        Ok(Self {
            graph,
            check_interval,
            attenuation,
            edge_decay,
            prune_below,
            last_partition: None,
        })
    }

    /// Read-only access to the graph.
    pub const fn graph(&self) -> &InteractionGraph {
        &self.graph
    }

    /// Epochs between fragmentation checks.
    pub const fn check_interval(&self) -> u64 {
        self.check_interval
    }

    /// Partition found by the most recent check.
    pub const fn last_partition(&self) -> Option<&ComponentPartition> {
        self.last_partition.as_ref()
    }

    /// Reinstate the partition of a previous check, so the next check
    /// reports its transition relative to it. Used when restoring state.
    pub fn restore_last_partition(&mut self, partition: Option<ComponentPartition>) {
        self.last_partition = partition;
    }

    /// Register an agent node.
    pub fn add_agent(&mut self, id: AgentId) -> bool {
        self.graph.add_node(id)
    }

    /// Remove an agent node and its edges.
    pub fn remove_agent(&mut self, id: AgentId) -> bool {
        self.graph.remove_node(id)
    }

    /// Strengthen the edge between two agents.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidWeight`] for a negative or non-finite delta.
    pub fn record_interaction(
        &mut self,
        a: AgentId,
        b: AgentId,
        delta: f64,
    ) -> Result<f64, TopologyError> {
        self.graph.record_interaction(a, b, delta)
    }

    /// Diffuse a signal from `source` with the configured attenuation.
    ///
    /// # Errors
    ///
    /// See [`InteractionGraph::propagate_resonance`].
    pub fn resonate(&self, source: AgentId, signal: f64) -> Result<ResonanceMap, TopologyError> {
        self.graph
            .propagate_resonance(source, signal, self.attenuation)
    }

    /// Whether a check is scheduled for `epoch`.
    pub const fn is_check_epoch(&self, epoch: u64) -> bool {
        matches!(epoch.checked_rem(self.check_interval), Some(0))
    }

    /// Run the fragmentation check if one is scheduled for `epoch`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::CorruptedGraph`] if traversal fails.
    pub fn maybe_check(&mut self, epoch: u64) -> Result<Option<TopologyCheck>, TopologyError> {
        if !self.is_check_epoch(epoch) {
            return Ok(None);
        }
        self.check(epoch).map(Some)
    }

    /// Run the fragmentation check now and log any connectivity change.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::CorruptedGraph`] if traversal fails.
    pub fn check(&mut self, epoch: u64) -> Result<TopologyCheck, TopologyError> {
        let partition = self.graph.detect_fragmentation()?;
        let previous = self.last_partition.as_ref().map_or(1, ComponentPartition::count);
        let current = partition.count();

        let transition = match (previous > 1, current > 1) {
            (false, true) => TopologyTransition::Fragmented {
                components: current,
            },
            (true, false) => TopologyTransition::Recovered,
            (true, true) if previous != current => TopologyTransition::Reshaped {
                from: previous,
                to: current,
            },
            _ => TopologyTransition::Unchanged,
        };

        match transition {
            TopologyTransition::Fragmented { components } => warn!(
                epoch,
                components,
                largest = partition.largest(),
                "interaction graph fragmented"
            ),
            TopologyTransition::Recovered => {
                info!(epoch, nodes = self.graph.node_count(), "interaction graph reconnected");
            }
            TopologyTransition::Reshaped { from, to } => {
                info!(epoch, from, to, "interaction graph components changed");
            }
            TopologyTransition::Unchanged => {
                debug!(epoch, components = current, "topology check");
            }
        }

        self.last_partition = Some(partition.clone());
        Ok(TopologyCheck {
            epoch,
            partition,
            transition,
        })
    }

    /// Age every edge and prune the weak ones. Returns the pruned count.
    ///
    /// # Errors
    ///
    /// Parameters are validated at construction, so this only fails if they
    /// were somehow invalidated.
    pub fn decay(&mut self) -> Result<usize, TopologyError> {
        let pruned = self.graph.decay(self.edge_decay, self.prune_below)?;
        if pruned > 0 {
            debug!(pruned, edges = self.graph.edge_count(), "pruned weak interaction edges");
        }
        Ok(pruned)
    }
}
