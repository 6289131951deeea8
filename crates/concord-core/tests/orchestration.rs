//! End-to-end runs of the orchestrator.
//!
//! Covers epoch sequencing, dictionary round-trips, determinism across
//! identical runs and across checkpoint/restore, cancellation, and rejection
//! of corrupted checkpoints.

// Integration tests use unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::arithmetic_side_effects
)]

use std::sync::{Arc, Mutex};

use concord_bus::{Message, SubscriberError};
use concord_core::orchestrator::EPOCH_COMPLETED_TOPIC;
use concord_core::{
    DefaultAgentFactory, InMemoryPersistence, Orchestrator, OrchestratorError, PersistenceAdapter,
    SimulationConfig, SimulationEndReason, run,
};
use concord_types::AgentId;
use serde_json::{Value, json};

fn config(agents: u64, epochs: u64) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.world.seed = 7;
    config.agents.count = agents;
    config.simulation.num_epochs = epochs;
    config.simulation.checkpoint_interval = 5;
    config.memory.capacity = 6;
    config.topology.check_interval = 2;
    config
}

fn sequence_recorder(
    seen: &Arc<Mutex<Vec<u64>>>,
) -> impl FnMut(&Message) -> Result<(), SubscriberError> + Send + 'static {
    let seen = Arc::clone(seen);
    move |m: &Message| {
        seen.lock().unwrap().push(m.sequence);
        Ok(())
    }
}

fn expect_corrupted(value: &Value) {
    match Orchestrator::from_dict(value, DefaultAgentFactory::new()) {
        Err(OrchestratorError::CorruptedCheckpoint { .. }) => {}
        Err(other) => panic!("expected a corrupted checkpoint error, got {other}"),
        Ok(_) => panic!("corrupted checkpoint was accepted"),
    }
}

// =========================================================================
// Epoch sequencing
// =========================================================================

#[test]
fn epochs_run_in_order_exactly_once() {
    let result = run(config(5, 12), DefaultAgentFactory::new()).unwrap();
    assert!(result.simulation_completed);
    assert_eq!(result.end_reason, SimulationEndReason::Completed);
    assert_eq!(result.epochs, (0..12).collect::<Vec<u64>>());
    assert_eq!(result.epochs_executed, 12);
    assert_eq!(result.final_state.epoch, 12);
}

#[test]
fn max_epochs_caps_the_run() {
    let mut cfg = config(3, 20);
    cfg.simulation.max_epochs = Some(4);
    let result = run(cfg, DefaultAgentFactory::new()).unwrap();
    assert!(result.simulation_completed);
    assert_eq!(result.epochs, vec![0, 1, 2, 3]);
}

#[test]
fn topology_checks_follow_interval() {
    let result = run(config(4, 7), DefaultAgentFactory::new()).unwrap();
    let checked: Vec<u64> = result.topology_checks.iter().map(|c| c.epoch).collect();
    assert_eq!(checked, vec![0, 2, 4, 6]);
}

#[test]
fn capacity_holds_for_every_agent() {
    let result = run(config(6, 30), DefaultAgentFactory::new()).unwrap();
    for agent in &result.final_state.agents {
        assert!(agent.memory.len() <= agent.capacity);
    }
}

// =========================================================================
// Dictionary form
// =========================================================================

#[test]
fn to_dict_from_dict_round_trip() {
    let mut orch = Orchestrator::new(config(4, 10), DefaultAgentFactory::new()).unwrap();
    orch.run_bounded(6).unwrap();

    let dict = orch.to_dict().unwrap();
    let restored = Orchestrator::from_dict(&dict, DefaultAgentFactory::new()).unwrap();
    assert_eq!(restored.snapshot(), orch.snapshot());
    assert_eq!(restored.to_dict().unwrap(), dict);
}

#[test]
fn persisted_layout_has_expected_shape() {
    let mut orch = Orchestrator::new(config(2, 10), DefaultAgentFactory::new()).unwrap();
    orch.run_bounded(3).unwrap();
    let dict = orch.to_dict().unwrap();

    assert_eq!(dict["epoch"], json!(3));
    assert!(dict["config"].is_object());
    assert_eq!(dict["agents"][0]["id"], json!(0));
    assert!(dict["agents"][0]["memory"].is_array());
    assert!(dict["agents"][0]["derived_fields"].is_object());
    assert_eq!(dict["graph"]["nodes"], json!([0, 1]));
    assert!(dict["graph"]["edges"].is_array());
    assert!(dict["last_partition"]["components"].is_array());
    assert!(dict["bus_sequences"]["agent/0"].is_u64());
    assert!(dict["agents"][0].get("handoff").is_none());
}

// =========================================================================
// Determinism
// =========================================================================

#[test]
fn identical_runs_are_identical() {
    let a = run(config(6, 15), DefaultAgentFactory::new()).unwrap();
    let b = run(config(6, 15), DefaultAgentFactory::new()).unwrap();
    assert_eq!(a.final_state, b.final_state);
    assert_eq!(a.topology_checks, b.topology_checks);
}

#[test]
fn different_seeds_diverge() {
    let a = run(config(6, 15), DefaultAgentFactory::new()).unwrap();
    let mut other = config(6, 15);
    other.world.seed = 8;
    let b = run(other, DefaultAgentFactory::new()).unwrap();
    assert_ne!(a.final_state.agents, b.final_state.agents);
}

#[test]
fn restore_from_checkpoint_matches_uninterrupted_run() {
    let store = InMemoryPersistence::new();
    let mut uninterrupted = Orchestrator::new(config(5, 10), DefaultAgentFactory::new())
        .unwrap()
        .with_persistence(store.clone());
    let full = uninterrupted.run().unwrap();
    assert_eq!(store.epochs(), vec![5, 10]);

    let mut resumed_store = InMemoryPersistence::new();
    resumed_store.save(5, &store.checkpoint(5).unwrap()).unwrap();
    let mut resumed =
        Orchestrator::restore_or_new(config(5, 10), DefaultAgentFactory::new(), resumed_store)
            .unwrap();
    assert_eq!(resumed.epoch(), 5);

    let rest = resumed.run().unwrap();
    assert_eq!(rest.epochs, vec![5, 6, 7, 8, 9]);
    assert_eq!(rest.final_state, full.final_state);
    let tail: Vec<_> = full
        .topology_checks
        .iter()
        .filter(|c| c.epoch >= 5)
        .cloned()
        .collect();
    assert_eq!(rest.topology_checks, tail);
}

#[test]
fn topology_transitions_survive_restore() {
    let mut fragmented_at_restore = 0;
    for seed in 0..20 {
        let mut cfg = config(6, 10);
        cfg.world.seed = seed;
        cfg.topology.check_interval = 1;
        cfg.topology.edge_decay = 0.3;
        cfg.topology.prune_below = 0.2;

        let full = run(cfg.clone(), DefaultAgentFactory::new()).unwrap();

        let mut first = Orchestrator::new(cfg, DefaultAgentFactory::new()).unwrap();
        first.run_bounded(5).unwrap();
        let saved = first.to_dict().unwrap();
        if saved["last_partition"]["components"]
            .as_array()
            .is_some_and(|c| c.len() > 1)
        {
            fragmented_at_restore += 1;
        }

        let mut resumed = Orchestrator::from_dict(&saved, DefaultAgentFactory::new()).unwrap();
        let rest = resumed.run().unwrap();
        let tail: Vec<_> = full
            .topology_checks
            .iter()
            .filter(|c| c.epoch >= 5)
            .cloned()
            .collect();
        assert_eq!(rest.topology_checks, tail, "seed {seed}");
        assert_eq!(rest.final_state, full.final_state, "seed {seed}");
    }
    assert!(fragmented_at_restore > 0);
}

#[test]
fn event_sequences_continue_after_restore() {
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();

    let mut first = Orchestrator::new(config(3, 10), DefaultAgentFactory::new()).unwrap();
    first.subscribe(EPOCH_COMPLETED_TOPIC, sequence_recorder(&seen)).unwrap();
    first.run_bounded(5).unwrap();
    let saved = first.to_dict().unwrap();
    assert_eq!(saved["bus_sequences"][EPOCH_COMPLETED_TOPIC], json!(5));

    let mut resumed = Orchestrator::from_dict(&saved, DefaultAgentFactory::new()).unwrap();
    resumed.subscribe(EPOCH_COMPLETED_TOPIC, sequence_recorder(&seen)).unwrap();
    resumed.run().unwrap();

    assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<u64>>());
}

#[test]
fn restore_without_checkpoint_starts_fresh() {
    let orch = Orchestrator::restore_or_new(
        config(3, 10),
        DefaultAgentFactory::new(),
        InMemoryPersistence::new(),
    )
    .unwrap();
    assert_eq!(orch.epoch(), 0);
    assert_eq!(orch.agent_ids().len(), 3);
}

// =========================================================================
// Cancellation
// =========================================================================

#[test]
fn cancelled_before_start_runs_nothing() {
    let mut orch = Orchestrator::new(config(3, 10), DefaultAgentFactory::new()).unwrap();
    orch.cancellation_flag().cancel();
    let result = orch.run().unwrap();
    assert!(!result.simulation_completed);
    assert_eq!(result.end_reason, SimulationEndReason::Cancelled);
    assert_eq!(result.epochs_executed, 0);
}

#[test]
fn cancellation_is_observed_at_the_next_boundary() {
    let mut orch = Orchestrator::new(config(3, 10), DefaultAgentFactory::new()).unwrap();
    let flag = orch.cancellation_flag();
    orch.subscribe(EPOCH_COMPLETED_TOPIC, move |m: &Message| {
        if m.payload["epoch"] == json!(2) {
            flag.cancel();
        }
        Ok(())
    })
    .unwrap();

    let result = orch.run().unwrap();
    assert_eq!(result.end_reason, SimulationEndReason::Cancelled);
    assert_eq!(result.epochs, vec![0, 1, 2]);
    assert_eq!(result.final_state.epoch, 3);
}

// =========================================================================
// Corrupted checkpoints
// =========================================================================

fn healthy_dict() -> Value {
    let mut orch = Orchestrator::new(config(3, 10), DefaultAgentFactory::new()).unwrap();
    orch.run_bounded(2).unwrap();
    orch.to_dict().unwrap()
}

#[test]
fn duplicate_agent_ids_are_rejected() {
    let mut dict = healthy_dict();
    let copy = dict["agents"][0].clone();
    dict["agents"].as_array_mut().unwrap().push(copy);
    expect_corrupted(&dict);
}

#[test]
fn memory_over_capacity_is_rejected() {
    let mut dict = healthy_dict();
    dict["logical_time"] = json!(1_000);
    dict["agents"][0]["capacity"] = json!(1);
    dict["agents"][0]["memory"] = json!([
        {"origin_id": 0, "sequence": 100, "timestamp": 900, "payload": "a"},
        {"origin_id": 0, "sequence": 101, "timestamp": 901, "payload": "b"}
    ]);
    expect_corrupted(&dict);
}

#[test]
fn edge_to_unknown_node_is_rejected() {
    let mut dict = healthy_dict();
    dict["graph"]["edges"] = json!([[0, 99, 1.0]]);
    expect_corrupted(&dict);
}

#[test]
fn negative_weight_is_rejected() {
    let mut dict = healthy_dict();
    dict["graph"]["edges"] = json!([[0, 1, -0.5]]);
    expect_corrupted(&dict);
}

#[test]
fn epoch_beyond_bound_is_rejected() {
    let mut dict = healthy_dict();
    dict["epoch"] = json!(11);
    expect_corrupted(&dict);
}

#[test]
fn missing_field_is_rejected() {
    let mut dict = healthy_dict();
    dict.as_object_mut().unwrap().remove("graph");
    expect_corrupted(&dict);
}

#[test]
fn removed_agent_leaves_graph_and_state() {
    let mut orch = Orchestrator::new(config(3, 10), DefaultAgentFactory::new()).unwrap();
    orch.run_bounded(3).unwrap();
    orch.remove_agent(AgentId(2)).unwrap();
    let state = orch.snapshot();
    assert!(state.agents.iter().all(|a| a.id != AgentId(2)));
    assert!(!state.graph.nodes.contains(&AgentId(2)));
    assert!(state.graph.edges.iter().all(|(a, b, _)| *a != AgentId(2) && *b != AgentId(2)));
    Orchestrator::from_dict(&orch.to_dict().unwrap(), DefaultAgentFactory::new()).unwrap();
}
