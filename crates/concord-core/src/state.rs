//! Persisted simulation state.
//!
//! [`SimulationState`] is the dictionary form of a whole run: everything
//! needed to rebuild an orchestrator that continues exactly where the
//! original left off. Its JSON layout is
//!
//! ```text
//! {
//!   "epoch": 12,
//!   "logical_time": 348,
//!   "config": { ... },
//!   "agents": [
//!     { "id": 0, "capacity": 64, "next_sequence": 9,
//!       "memory": [{"origin_id": 0, "sequence": 8, "timestamp": 340, "payload": ...}],
//!       "personality": { ... }, "derived_fields": { ... },
//!       "handoff": "<uuid>" }
//!   ],
//!   "graph": { "nodes": [0, 1], "edges": [[0, 1, 0.81]] },
//!   "last_partition": { "components": [[0, 1]] },
//!   "bus_sequences": { "agent/0": 3, "epoch.completed": 12 }
//! }
//! ```
//!
//! Agents are ordered by id, memory entries by key, graph edges by endpoints.
//! `handoff` is present only on an agent frozen mid-handoff. `last_partition`
//! is the partition seen by the most recent topology check, if any, and
//! `bus_sequences` holds the next sequence number of every live bus topic.
//! Both default to empty when absent.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use concord_bus::Topic;
use concord_topology::{ComponentPartition, GraphRecord};
use concord_types::{AgentId, HandoffId, MemoryEntry, Personality};

use crate::config::SimulationConfig;

/// Per-agent counters maintained by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDerived {
    /// Interactions recorded with any peer (either side initiating).
    pub interactions: u64,
    /// Pairwise memory merges taken part in.
    pub merges: u64,
    /// Direct messages received.
    pub messages_received: u64,
    /// Accumulated resonance received from other agents.
    pub resonance: f64,
    /// Last epoch in which the agent acted.
    pub last_active_epoch: Option<u64>,
}

/// One agent in persisted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent identifier.
    pub id: AgentId,
    /// Memory capacity.
    pub capacity: usize,
    /// Next local sequence number.
    pub next_sequence: u64,
    /// Memory entries ordered by key.
    pub memory: Vec<MemoryEntry>,
    /// Personality.
    pub personality: Personality,
    /// Orchestrator-maintained counters.
    pub derived_fields: AgentDerived,
    /// Outstanding handoff when the agent is frozen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffId>,
}

/// Full run state in persisted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Next epoch to execute.
    pub epoch: u64,
    /// Next logical timestamp.
    pub logical_time: u64,
    /// Run configuration.
    pub config: SimulationConfig,
    /// Agents ordered by id.
    pub agents: Vec<AgentRecord>,
    /// Interaction graph.
    pub graph: GraphRecord,
    /// Partition observed by the most recent topology check.
    #[serde(default)]
    pub last_partition: Option<ComponentPartition>,
    /// Next sequence number per live bus topic.
    #[serde(default)]
    pub bus_sequences: BTreeMap<Topic, u64>,
}

impl SimulationState {
    /// Check the cross-field consistency a checkpoint must have.
    ///
    /// Per-store and per-graph structure (capacity, duplicate keys, edge
    /// endpoints, weights) is checked when those parts are rebuilt.
    ///
    /// # Errors
    ///
    /// Returns a description of the first inconsistency found.
    pub fn check_consistency(&self) -> Result<(), String> {
        let target = self.config.target_epochs();
        if self.epoch > target {
            return Err(format!(
                "epoch {} is beyond the configured bound {target}",
                self.epoch
            ));
        }

        let nodes: BTreeSet<AgentId> = self.graph.nodes.iter().copied().collect();
        if nodes.len() != self.graph.nodes.len() {
            return Err(String::from("graph lists a node more than once"));
        }

        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id) {
                return Err(format!("agent {} appears more than once", agent.id));
            }
            if !nodes.contains(&agent.id) {
                return Err(format!("agent {} has no graph node", agent.id));
            }
            if let Some(entry) = agent
                .memory
                .iter()
                .find(|e| e.timestamp >= self.logical_time)
            {
                return Err(format!(
                    "entry {} of agent {} has timestamp {} at or after logical time {}",
                    entry.key(),
                    agent.id,
                    entry.timestamp,
                    self.logical_time
                ));
            }
        }

        if let Some(orphan) = nodes.iter().find(|n| !seen.contains(*n)) {
            return Err(format!("graph node {orphan} has no agent"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(id: u64, memory: Vec<MemoryEntry>) -> AgentRecord {
        AgentRecord {
            id: AgentId(id),
            capacity: 4,
            next_sequence: 0,
            memory,
            personality: Personality::balanced(),
            derived_fields: AgentDerived::default(),
            handoff: None,
        }
    }

    fn state(agents: Vec<AgentRecord>, nodes: Vec<u64>) -> SimulationState {
        SimulationState {
            epoch: 0,
            logical_time: 10,
            config: SimulationConfig::default(),
            agents,
            graph: GraphRecord {
                nodes: nodes.into_iter().map(AgentId).collect(),
                edges: Vec::new(),
            },
            last_partition: None,
            bus_sequences: BTreeMap::new(),
        }
    }

    #[test]
    fn consistent_state_passes() {
        let s = state(vec![record(1, Vec::new()), record(2, Vec::new())], vec![1, 2]);
        s.check_consistency().unwrap();
    }

    #[test]
    fn duplicate_agent_is_rejected() {
        let s = state(vec![record(1, Vec::new()), record(1, Vec::new())], vec![1]);
        assert!(s.check_consistency().is_err());
    }

    #[test]
    fn missing_graph_node_is_rejected() {
        let s = state(vec![record(1, Vec::new())], vec![]);
        assert!(s.check_consistency().is_err());
        let s = state(vec![], vec![3]);
        assert!(s.check_consistency().is_err());
    }

    #[test]
    fn future_timestamp_is_rejected() {
        let entry = MemoryEntry::new(AgentId(1), 0, 10, json!("x"));
        let s = state(vec![record(1, vec![entry])], vec![1]);
        assert!(s.check_consistency().unwrap_err().contains("logical time"));
    }

    #[test]
    fn older_layout_without_optional_fields_loads() {
        let mut value = serde_json::to_value(state(vec![record(1, Vec::new())], vec![1])).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("last_partition");
        object.remove("bus_sequences");
        assert!(value["agents"][0].get("handoff").is_none());

        let loaded: SimulationState = serde_json::from_value(value).unwrap();
        assert!(loaded.last_partition.is_none());
        assert!(loaded.bus_sequences.is_empty());
        assert!(loaded.agents.iter().all(|a| a.handoff.is_none()));
    }

    #[test]
    fn epoch_beyond_bound_is_rejected() {
        let mut s = state(Vec::new(), Vec::new());
        s.epoch = 1_000;
        assert!(s.check_consistency().is_err());
    }
}
