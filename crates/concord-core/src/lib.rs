//! Epoch clock, orchestration, persistence, and agent handoff for Concord.
//!
//! This crate owns the epoch loop that drives a run: each epoch the agents
//! act, their messages are delivered through the bus, requested memory
//! merges run, and the interaction graph is updated and periodically
//! checked for fragmentation.
//!
//! # Modules
//!
//! - [`agent`] -- [`AgentBehavior`] and [`AgentFactory`] traits and the
//!   default personality-driven agent.
//! - [`cancel`] -- Cooperative cancellation flag checked between epochs.
//! - [`clock`] -- Epoch counter and logical timestamp source.
//! - [`config`] -- Configuration loading from `concord-config.yaml`.
//! - [`handoff`] -- Freeze-until-acknowledged agent transfer.
//! - [`orchestrator`] -- The [`Orchestrator`] and its six-phase epoch.
//! - [`persistence`] -- [`PersistenceAdapter`] trait and in-memory checkpoints.
//! - [`state`] -- Persisted run state.
//!
//! [`AgentBehavior`]: agent::AgentBehavior
//! [`AgentFactory`]: agent::AgentFactory
//! [`Orchestrator`]: orchestrator::Orchestrator
//! [`PersistenceAdapter`]: persistence::PersistenceAdapter

pub mod agent;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod handoff;
pub mod orchestrator;
pub mod persistence;
pub mod state;

pub use agent::{
    AgentBehavior, AgentContext, AgentError, AgentFactory, AgentOutput, DefaultAgentFactory,
    OutboundMessage, PersonalityAgent, Recipient,
};
pub use cancel::CancellationFlag;
pub use config::{ConfigError, SimulationConfig};
pub use handoff::{HandoffAck, HandoffError, HandoffPacket};
pub use orchestrator::{
    Component, ComponentError, EpochSummary, Orchestrator, OrchestratorError,
    SimulationEndReason, SimulationResult, run,
};
pub use persistence::{InMemoryPersistence, PersistenceAdapter, PersistenceError};
pub use state::{AgentDerived, AgentRecord, SimulationState};
