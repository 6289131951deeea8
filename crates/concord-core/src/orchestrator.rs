//! The epoch loop.
//!
//! One [`Orchestrator`] value owns all run state: the clock, every agent's
//! memory store and behaviour, the topology manager, and the message bus.
//! Each call to [`Orchestrator::run_epoch`] executes one epoch in six
//! phases:
//!
//! 1. **Begin** -- seal the bus registry
//! 2. **Act** -- each active agent, in id order, produces an [`AgentOutput`];
//!    its observations are recorded into its own memory
//! 3. **Deliver** -- outbound messages are queued on the bus and flushed;
//!    direct messages become memories of the recipient
//! 4. **Merge** -- pairwise anti-entropy for each requested sync pair
//! 5. **Topology** -- interactions strengthen edges, resonance diffuses, the
//!    scheduled fragmentation check runs, edges decay
//! 6. **End** -- publish `epoch.completed`, unseal the registry, advance the
//!    clock, checkpoint if due
//!
//! Validation failures inside a phase are logged and skipped. Structural
//! failures abort the epoch with an [`OrchestratorError::Epoch`] naming the
//! epoch and the component.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use concord_bus::{BusError, Message, MessageBus, SubscriberError, SubscriptionId, Topic};
use concord_memory::{MemoryError, MemoryStore};
use concord_topology::{InteractionGraph, TopologyCheck, TopologyError, TopologyManager};
use concord_types::{AgentId, HandoffId, Personality, RunId};

use crate::agent::{self, AgentBehavior, AgentContext, AgentFactory, AgentOutput, Recipient};
use crate::cancel::CancellationFlag;
use crate::clock::{ClockError, EpochClock};
use crate::config::{ConfigError, SimulationConfig};
use crate::handoff::HandoffError;
use crate::persistence::{PersistenceAdapter, PersistenceError};
use crate::state::{AgentDerived, AgentRecord, SimulationState};

/// Topic carrying one [`EpochSummary`] per completed epoch.
pub const EPOCH_COMPLETED_TOPIC: &str = "epoch.completed";

/// Topic carrying each scheduled [`TopologyCheck`].
pub const TOPOLOGY_CHECK_TOPIC: &str = "topology.check";

/// Publisher label used for orchestrator events.
const ORCHESTRATOR_SOURCE: &str = "orchestrator";

/// Inbox topic of an agent: `agent/<id>`.
pub fn inbox_topic(id: AgentId) -> Topic {
    Topic::new(format!("agent/{}", id.into_inner()))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Component in which a structural failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// An agent memory store.
    Memory,
    /// The topology manager.
    Topology,
    /// The message bus.
    Bus,
    /// The persistence adapter.
    Persistence,
    /// The epoch clock.
    Clock,
}

impl core::fmt::Display for Component {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::Topology => "topology",
            Self::Bus => "bus",
            Self::Persistence => "persistence",
            Self::Clock => "clock",
        };
        f.write_str(name)
    }
}

/// Underlying failure of a component.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// Memory store failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// Topology failure.
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// Bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Persistence failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// Clock failure.
    #[error(transparent)]
    Clock(#[from] ClockError),
}

impl ComponentError {
    /// The component the failure came from.
    pub const fn component(&self) -> Component {
        match self {
            Self::Memory(_) => Component::Memory,
            Self::Topology(_) => Component::Topology,
            Self::Bus(_) => Component::Bus,
            Self::Persistence(_) => Component::Persistence,
            Self::Clock(_) => Component::Clock,
        }
    }
}

/// Errors returned by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A component could not be constructed.
    #[error("failed to initialise {component}: {source}")]
    Setup {
        /// The failing component.
        component: Component,
        /// The underlying error.
        source: ComponentError,
    },

    /// An epoch failed structurally. The run cannot continue.
    #[error("epoch {epoch} failed in {component}: {source}")]
    Epoch {
        /// The failing epoch.
        epoch: u64,
        /// The failing component.
        component: Component,
        /// The underlying error.
        source: ComponentError,
    },

    /// A persisted state is inconsistent and cannot be restored.
    #[error("corrupted checkpoint: {reason}")]
    CorruptedCheckpoint {
        /// What is wrong with it.
        reason: String,
    },

    /// The state could not be encoded.
    #[error("state serialization failed: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },

    /// Every configured epoch has already run.
    #[error("epoch bound reached: {epoch} of {target} epochs executed")]
    BoundReached {
        /// Epochs executed.
        epoch: u64,
        /// Configured bound.
        target: u64,
    },

    /// A handoff step failed.
    #[error(transparent)]
    Handoff(#[from] HandoffError),

    /// No agent with this id.
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// An agent with this id already exists.
    #[error("agent {0} already exists")]
    DuplicateAgent(AgentId),

    /// The agent is frozen by an in-flight handoff.
    #[error("agent {0} is frozen by an in-flight handoff")]
    AgentFrozen(AgentId),

    /// An earlier epoch failed part-way and left its effects applied.
    /// Restore from a checkpoint to continue.
    #[error("orchestrator halted: epoch {epoch} failed part-way")]
    Halted {
        /// The epoch that failed.
        epoch: u64,
    },
}

impl OrchestratorError {
    fn at_epoch(epoch: u64, err: impl Into<ComponentError>) -> Self {
        let source = err.into();
        Self::Epoch {
            epoch,
            component: source.component(),
            source,
        }
    }

    fn setup(err: impl Into<ComponentError>) -> Self {
        let source = err.into();
        Self::Setup {
            component: source.component(),
            source,
        }
    }

    fn corrupted(reason: impl Into<String>) -> Self {
        Self::CorruptedCheckpoint {
            reason: reason.into(),
        }
    }
}

fn at<E: Into<ComponentError>>(epoch: u64) -> impl FnOnce(E) -> OrchestratorError {
    move |err| OrchestratorError::at_epoch(epoch, err)
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationEndReason {
    /// Every configured epoch ran.
    Completed,
    /// The cancellation flag was set.
    Cancelled,
    /// The caller-supplied bound stopped the run before the configured one.
    EpochBudgetExhausted,
}

/// Outcome of one epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// The epoch that was executed.
    pub epoch: u64,
    /// Agents that were eligible to act.
    pub active_agents: usize,
    /// Observations recorded.
    pub observations: usize,
    /// Direct messages recorded into recipients' memories.
    pub messages_delivered: usize,
    /// Messages dropped (unknown or frozen recipient, full queue).
    pub messages_dropped: usize,
    /// Subscriber failures contained by the bus.
    pub subscriber_failures: usize,
    /// Pairwise merges performed.
    pub merges: usize,
    /// Interactions recorded on the graph.
    pub interactions: usize,
    /// Resonance pulses diffused.
    pub resonance_pulses: usize,
    /// Fragmentation check, if one was scheduled.
    pub topology_check: Option<TopologyCheck>,
    /// Edges pruned by decay.
    pub edges_pruned: usize,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    /// Whether every configured epoch ran.
    pub simulation_completed: bool,
    /// Why the run stopped.
    pub end_reason: SimulationEndReason,
    /// Epochs executed by this call.
    pub epochs_executed: u64,
    /// The epoch indices executed, in order.
    pub epochs: Vec<u64>,
    /// Fragmentation checks observed, in order.
    pub topology_checks: Vec<TopologyCheck>,
    /// State after the last executed epoch.
    pub final_state: SimulationState,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Whether an agent takes part in epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AgentStatus {
    /// Acts, merges, and receives.
    Active,
    /// Held unchanged while a handoff is in flight.
    Frozen {
        /// The in-flight handoff.
        handoff_id: HandoffId,
    },
}

pub(crate) struct AgentSlot {
    pub(crate) memory: MemoryStore,
    pub(crate) personality: Personality,
    pub(crate) derived: AgentDerived,
    pub(crate) status: AgentStatus,
    pub(crate) behavior: Box<dyn AgentBehavior>,
    pub(crate) subscription: SubscriptionId,
}

impl AgentSlot {
    pub(crate) fn to_record(&self, id: AgentId) -> AgentRecord {
        AgentRecord {
            id,
            capacity: self.memory.capacity(),
            next_sequence: self.memory.next_sequence(),
            memory: self.memory.entries().into_iter().cloned().collect(),
            personality: self.personality,
            derived_fields: self.derived.clone(),
            handoff: match self.status {
                AgentStatus::Frozen { handoff_id } => Some(handoff_id),
                AgentStatus::Active => None,
            },
        }
    }
}

/// A direct message captured by an agent's inbox subscription.
struct Inbound {
    recipient: AgentId,
    message: Message,
}

/// Coordinator of one run.
pub struct Orchestrator {
    pub(crate) config: SimulationConfig,
    pub(crate) clock: EpochClock,
    pub(crate) agents: BTreeMap<AgentId, AgentSlot>,
    pub(crate) topology: TopologyManager,
    pub(crate) bus: MessageBus,
    inbox_tx: mpsc::Sender<Inbound>,
    inbox_rx: mpsc::Receiver<Inbound>,
    factory: Box<dyn AgentFactory>,
    persistence: Option<Box<dyn PersistenceAdapter>>,
    cancel: CancellationFlag,
    run_id: RunId,
    halted: Option<u64>,
    last_checkpoint: Option<u64>,
}

impl Orchestrator {
    /// Create a fresh run: `config.agents.count` agents with ids `0..count`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] for an invalid configuration.
    pub fn new<F>(config: SimulationConfig, factory: F) -> Result<Self, OrchestratorError>
    where
        F: AgentFactory + 'static,
    {
        config.validate()?;
        let mut orchestrator = Self::empty(
            config,
            Box::new(factory),
            EpochClock::new(),
            InteractionGraph::new(),
        )?;

        let count = orchestrator.config.agents.count;
        for raw in 0..count {
            let id = AgentId(raw);
            let personality = orchestrator.initial_personality(id);
            let memory = MemoryStore::new(id, orchestrator.config.memory.capacity)
                .map_err(OrchestratorError::setup)?;
            orchestrator
                .attach_agent(id, memory, personality, AgentDerived::default())
                .map_err(OrchestratorError::setup)?;
        }

        info!(
            run_id = %orchestrator.run_id,
            world = %orchestrator.config.world.name,
            seed = orchestrator.config.world.seed,
            agents = count,
            target_epochs = orchestrator.config.target_epochs(),
            "Orchestrator initialised"
        );
        Ok(orchestrator)
    }

    fn empty(
        config: SimulationConfig,
        factory: Box<dyn AgentFactory>,
        clock: EpochClock,
        graph: InteractionGraph,
    ) -> Result<Self, OrchestratorError> {
        let t = &config.topology;
        let topology = TopologyManager::with_graph(
            graph,
            t.check_interval,
            t.attenuation,
            t.edge_decay,
            t.prune_below,
        )
        .map_err(OrchestratorError::setup)?;
        let bus = MessageBus::new(config.bus.queue_capacity, config.bus.backpressure)
            .map_err(OrchestratorError::setup)?;
        let (inbox_tx, inbox_rx) = mpsc::channel();
        Ok(Self {
            config,
            clock,
            agents: BTreeMap::new(),
            topology,
            bus,
            inbox_tx,
            inbox_rx,
            factory,
            persistence: None,
            cancel: CancellationFlag::new(),
            run_id: RunId::new(),
            halted: None,
            last_checkpoint: None,
        })
    }

    /// Save checkpoints through `adapter`.
    #[must_use]
    pub fn with_persistence(mut self, adapter: impl PersistenceAdapter + 'static) -> Self {
        self.persistence = Some(Box::new(adapter));
        self
    }

    /// Observe `flag` at epoch boundaries instead of a private flag.
    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Handle that cancels this run.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Resume from the latest checkpoint in `adapter`, or start fresh.
    ///
    /// A resumed run keeps the configuration stored in the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Setup`] if the adapter cannot be read,
    /// [`OrchestratorError::CorruptedCheckpoint`] if the checkpoint is
    /// inconsistent, or any error from [`new`](Self::new).
    pub fn restore_or_new<F, A>(
        config: SimulationConfig,
        factory: F,
        adapter: A,
    ) -> Result<Self, OrchestratorError>
    where
        F: AgentFactory + 'static,
        A: PersistenceAdapter + 'static,
    {
        let latest = adapter.load_latest().map_err(OrchestratorError::setup)?;
        let orchestrator = if let Some(value) = latest {
            let restored = Self::from_dict(&value, factory)?;
            if restored.config != config {
                warn!("Checkpoint configuration differs from the supplied one, keeping the checkpoint's");
            }
            info!(
                epoch = restored.epoch(),
                agents = restored.agents.len(),
                "Resumed from checkpoint"
            );
            restored
        } else {
            Self::new(config, factory)?
        };
        Ok(orchestrator.with_persistence(adapter))
    }

    // -------------------------------------------------------------------
    // Dictionary form
    // -------------------------------------------------------------------

    /// Capture the full run state.
    pub fn snapshot(&self) -> SimulationState {
        SimulationState {
            epoch: self.clock.epoch(),
            logical_time: self.clock.logical_time(),
            config: self.config.clone(),
            agents: self
                .agents
                .iter()
                .map(|(id, slot)| slot.to_record(*id))
                .collect(),
            graph: self.topology.graph().to_record(),
            last_partition: self.topology.last_partition().cloned(),
            bus_sequences: self.bus.sequences(),
        }
    }

    /// Encode the full run state. Inverse of [`from_dict`](Self::from_dict).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Serialization`] if a payload cannot be encoded.
    pub fn to_dict(&self) -> Result<Value, OrchestratorError> {
        serde_json::to_value(self.snapshot()).map_err(|e| OrchestratorError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Rebuild a run from its dictionary form.
    ///
    /// Behaviours are recreated through `factory`. Handoffs in flight when
    /// the state was captured are not persisted; every agent comes back active.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::CorruptedCheckpoint`] for anything that
    /// does not decode or is inconsistent: duplicate agent ids, a store over
    /// capacity or with repeated keys, edges to unknown nodes, negative
    /// weights, an epoch beyond the configured bound.
    pub fn from_dict<F>(value: &Value, factory: F) -> Result<Self, OrchestratorError>
    where
        F: AgentFactory + 'static,
    {
        let state = SimulationState::deserialize(value)
            .map_err(|e| OrchestratorError::corrupted(e.to_string()))?;
        Self::from_state(state, Box::new(factory))
    }

    fn from_state(
        state: SimulationState,
        factory: Box<dyn AgentFactory>,
    ) -> Result<Self, OrchestratorError> {
        state
            .config
            .validate()
            .map_err(|e| OrchestratorError::corrupted(format!("config: {e}")))?;
        state.check_consistency().map_err(OrchestratorError::corrupted)?;
        let graph = InteractionGraph::from_record(&state.graph)
            .map_err(|e| OrchestratorError::corrupted(format!("graph: {e}")))?;

        let clock = EpochClock::from_parts(state.epoch, state.logical_time);
        let mut orchestrator = Self::empty(state.config, factory, clock, graph)
            .map_err(|e| OrchestratorError::corrupted(e.to_string()))?;

        for record in state.agents {
            let id = record.id;
            let memory =
                MemoryStore::from_parts(id, record.capacity, record.next_sequence, record.memory)
                    .map_err(|e| OrchestratorError::corrupted(format!("memory of {id}: {e}")))?;
            orchestrator
                .attach_agent(id, memory, record.personality, record.derived_fields)
                .map_err(|e| OrchestratorError::corrupted(format!("agent {id}: {e}")))?;
            if let Some(handoff_id) = record.handoff
                && let Some(slot) = orchestrator.agents.get_mut(&id)
            {
                slot.status = AgentStatus::Frozen { handoff_id };
                warn!(
                    agent = %id,
                    handoff = %handoff_id,
                    "Restored agent is frozen by an in-flight handoff"
                );
            }
        }
        orchestrator.topology.restore_last_partition(state.last_partition);
        orchestrator.bus.restore_sequences(state.bus_sequences);
        Ok(orchestrator)
    }

    // -------------------------------------------------------------------
    // Running
    // -------------------------------------------------------------------

    /// Run every remaining configured epoch.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Epoch`] if an epoch fails structurally.
    pub fn run(&mut self) -> Result<SimulationResult, OrchestratorError> {
        self.run_bounded(u64::MAX)
    }

    /// Run until the epoch counter reaches `max_epochs` or the configured
    /// bound, whichever is smaller, or until cancelled.
    ///
    /// Stopping at `max_epochs` before the configured bound reports
    /// [`SimulationEndReason::EpochBudgetExhausted`] and
    /// `simulation_completed = false`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Epoch`] if an epoch fails structurally,
    /// or [`OrchestratorError::Halted`] if an earlier one did.
    pub fn run_bounded(&mut self, max_epochs: u64) -> Result<SimulationResult, OrchestratorError> {
        self.ensure_not_halted()?;
        let target = self.config.target_epochs();
        let bound = target.min(max_epochs);
        let mut epochs = Vec::new();
        let mut topology_checks = Vec::new();

        info!(
            run_id = %self.run_id,
            start_epoch = self.clock.epoch(),
            bound,
            target,
            "Simulation starting"
        );

        let end_reason = loop {
            if self.clock.epoch() >= bound {
                break if bound >= target {
                    SimulationEndReason::Completed
                } else {
                    SimulationEndReason::EpochBudgetExhausted
                };
            }
            if self.cancel.is_cancelled() {
                info!(epoch = self.clock.epoch(), "Cancellation requested");
                break SimulationEndReason::Cancelled;
            }

            let summary = self.run_epoch()?;
            epochs.push(summary.epoch);
            if let Some(check) = summary.topology_check {
                topology_checks.push(check);
            }
        };

        if !epochs.is_empty() && self.last_checkpoint != Some(self.clock.epoch()) {
            self.checkpoint()?;
        }

        let result = SimulationResult {
            simulation_completed: end_reason == SimulationEndReason::Completed,
            end_reason,
            epochs_executed: u64::try_from(epochs.len()).unwrap_or(u64::MAX),
            epochs,
            topology_checks,
            final_state: self.snapshot(),
        };
        log_simulation_end(&result);
        Ok(result)
    }

    /// Execute exactly one epoch.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::BoundReached`] if every configured epoch has run
    /// - [`OrchestratorError::Epoch`] for a structural failure, after which
    ///   the orchestrator is halted
    /// - [`OrchestratorError::Halted`] if an earlier epoch failed
    pub fn run_epoch(&mut self) -> Result<EpochSummary, OrchestratorError> {
        self.ensure_not_halted()?;
        let epoch = self.clock.epoch();
        let target = self.config.target_epochs();
        if epoch >= target {
            return Err(OrchestratorError::BoundReached { epoch, target });
        }

        debug!(epoch, "Epoch started");
        self.bus.seal();
        let outcome = self.execute_phases(epoch);
        self.bus.unseal();
        let summary = outcome.map_err(|err| self.halt(epoch, err))?;

        self.clock
            .advance()
            .map_err(at(epoch))
            .map_err(|err| self.halt(epoch, err))?;
        let interval = self.config.simulation.checkpoint_interval;
        if matches!(self.clock.epoch().checked_rem(interval), Some(0)) {
            self.checkpoint()?;
        }

        info!(
            epoch,
            agents = summary.active_agents,
            observations = summary.observations,
            messages = summary.messages_delivered,
            merges = summary.merges,
            interactions = summary.interactions,
            "Epoch completed"
        );
        Ok(summary)
    }

    /// Refuse further epochs once one has failed part-way.
    fn halt(&mut self, epoch: u64, err: OrchestratorError) -> OrchestratorError {
        self.halted = Some(epoch);
        error!(
            run_id = %self.run_id,
            epoch,
            error = %err,
            "Epoch failed part-way, orchestrator halted"
        );
        err
    }

    const fn ensure_not_halted(&self) -> Result<(), OrchestratorError> {
        match self.halted {
            Some(epoch) => Err(OrchestratorError::Halted { epoch }),
            None => Ok(()),
        }
    }

    fn execute_phases(&mut self, epoch: u64) -> Result<EpochSummary, OrchestratorError> {
        let mut summary = EpochSummary {
            epoch,
            ..EpochSummary::default()
        };

        let mut outputs = self.act_phase(epoch, &mut summary)?;
        self.deliver_phase(epoch, &mut outputs, &mut summary)?;
        self.merge_phase(epoch, &outputs, &mut summary)?;
        self.topology_phase(epoch, &outputs, &mut summary)?;

        let failures = self.publish_event(EPOCH_COMPLETED_TOPIC, &summary);
        summary.subscriber_failures = summary.subscriber_failures.saturating_add(failures);
        Ok(summary)
    }

    fn act_phase(
        &mut self,
        epoch: u64,
        summary: &mut EpochSummary,
    ) -> Result<Vec<(AgentId, AgentOutput)>, OrchestratorError> {
        let active = self.active_agents();
        summary.active_agents = active.len();
        let seed = self.config.world.seed;
        let mut outputs = Vec::with_capacity(active.len());

        for &id in &active {
            let peers: Vec<AgentId> = active.iter().copied().filter(|p| *p != id).collect();
            let Some(slot) = self.agents.get_mut(&id) else {
                continue;
            };
            let mut rng = agent::agent_rng(seed, epoch, id);
            let ctx = AgentContext {
                epoch,
                agent_id: id,
                personality: &slot.personality,
                peers: &peers,
                memory: &slot.memory,
                rng: &mut rng,
            };
            let mut output = match slot.behavior.act(ctx) {
                Ok(output) => output,
                Err(err) => {
                    warn!(epoch, agent = %id, error = %err, "Agent failed to act, skipping its turn");
                    continue;
                }
            };
            slot.derived.last_active_epoch = Some(epoch);

            for payload in std::mem::take(&mut output.observations) {
                let timestamp = self.clock.stamp().map_err(at(epoch))?;
                match slot.memory.record(timestamp, payload) {
                    Ok(_) => summary.observations = summary.observations.saturating_add(1),
                    Err(err) if err.is_recoverable() => {
                        warn!(epoch, agent = %id, error = %err, "Observation rejected");
                    }
                    Err(err) => return Err(OrchestratorError::at_epoch(epoch, err)),
                }
            }
            outputs.push((id, output));
        }
        Ok(outputs)
    }

    fn deliver_phase(
        &mut self,
        epoch: u64,
        outputs: &mut [(AgentId, AgentOutput)],
        summary: &mut EpochSummary,
    ) -> Result<(), OrchestratorError> {
        for (from, output) in outputs.iter_mut() {
            let from = *from;
            for message in std::mem::take(&mut output.messages) {
                let topic = match message.to {
                    Recipient::Agent(to) if self.agents.contains_key(&to) => inbox_topic(to),
                    Recipient::Agent(to) => {
                        warn!(epoch, from = %from, to = %to, "Message to unknown agent dropped");
                        summary.messages_dropped = summary.messages_dropped.saturating_add(1);
                        continue;
                    }
                    Recipient::Topic(topic) => topic,
                };
                let envelope = json!({ "from": from, "body": message.body });
                if let Err(err) = self.bus.enqueue(topic, envelope, from.to_string()) {
                    warn!(epoch, from = %from, error = %err, "Message dropped by the bus");
                    summary.messages_dropped = summary.messages_dropped.saturating_add(1);
                }
            }
        }

        for report in self.bus.flush() {
            summary.subscriber_failures =
                summary.subscriber_failures.saturating_add(report.failures.len());
        }

        while let Ok(inbound) = self.inbox_rx.try_recv() {
            self.record_inbound(epoch, inbound, summary)?;
        }
        Ok(())
    }

    fn record_inbound(
        &mut self,
        epoch: u64,
        inbound: Inbound,
        summary: &mut EpochSummary,
    ) -> Result<(), OrchestratorError> {
        let Inbound { recipient, message } = inbound;
        let Some(slot) = self.agents.get_mut(&recipient) else {
            warn!(epoch, to = %recipient, "Recipient left before delivery, message dropped");
            summary.messages_dropped = summary.messages_dropped.saturating_add(1);
            return Ok(());
        };
        if let AgentStatus::Frozen { handoff_id } = slot.status {
            warn!(epoch, to = %recipient, %handoff_id, "Recipient frozen by handoff, message dropped");
            summary.messages_dropped = summary.messages_dropped.saturating_add(1);
            return Ok(());
        }

        let payload = json!({
            "kind": "message",
            "from": message.payload.get("from").cloned().unwrap_or(Value::Null),
            "topic": message.topic.as_str(),
            "body": message.payload.get("body").cloned().unwrap_or(Value::Null),
            "epoch": epoch,
        });
        let timestamp = self.clock.stamp().map_err(at(epoch))?;
        match slot.memory.record(timestamp, payload) {
            Ok(_) => {
                slot.derived.messages_received = slot.derived.messages_received.saturating_add(1);
                summary.messages_delivered = summary.messages_delivered.saturating_add(1);
            }
            Err(err) if err.is_recoverable() => {
                warn!(epoch, to = %recipient, error = %err, "Delivered message rejected by memory");
            }
            Err(err) => return Err(OrchestratorError::at_epoch(epoch, err)),
        }
        Ok(())
    }

    fn merge_phase(
        &mut self,
        epoch: u64,
        outputs: &[(AgentId, AgentOutput)],
        summary: &mut EpochSummary,
    ) -> Result<(), OrchestratorError> {
        let mut pairs = BTreeSet::new();
        for (id, output) in outputs {
            for &peer in &output.sync_with {
                if peer == *id || !self.is_active(peer) {
                    debug!(epoch, agent = %id, peer = %peer, "Ignoring sync request");
                    continue;
                }
                pairs.insert(((*id).min(peer), (*id).max(peer)));
            }
        }

        for (a, b) in pairs {
            let Some(b_view) = self.agents.get(&b).map(|slot| slot.memory.clone()) else {
                continue;
            };
            let Some(a_slot) = self.agents.get_mut(&a) else {
                continue;
            };
            a_slot.memory.merge(&b_view).map_err(at(epoch))?;
            a_slot.derived.merges = a_slot.derived.merges.saturating_add(1);
            let a_view = a_slot.memory.clone();

            let Some(b_slot) = self.agents.get_mut(&b) else {
                continue;
            };
            b_slot.memory.merge(&a_view).map_err(at(epoch))?;
            b_slot.derived.merges = b_slot.derived.merges.saturating_add(1);
            summary.merges = summary.merges.saturating_add(1);
        }
        Ok(())
    }

    fn topology_phase(
        &mut self,
        epoch: u64,
        outputs: &[(AgentId, AgentOutput)],
        summary: &mut EpochSummary,
    ) -> Result<(), OrchestratorError> {
        let weight = self.config.topology.interaction_weight;
        for (id, output) in outputs {
            for &peer in &output.interactions {
                if peer == *id || !self.is_active(peer) {
                    debug!(epoch, agent = %id, peer = %peer, "Ignoring interaction");
                    continue;
                }
                self.topology
                    .record_interaction(*id, peer, weight)
                    .map_err(at(epoch))?;
                for end in [*id, peer] {
                    if let Some(slot) = self.agents.get_mut(&end) {
                        slot.derived.interactions = slot.derived.interactions.saturating_add(1);
                    }
                }
                summary.interactions = summary.interactions.saturating_add(1);
            }
        }

        for (id, output) in outputs {
            if let Some(signal) = output.resonance {
                self.diffuse(epoch, *id, signal, summary)?;
            }
        }

        summary.topology_check = self.topology.maybe_check(epoch).map_err(at(epoch))?;
        if let Some(check) = summary.topology_check.clone() {
            let failures = self.publish_event(TOPOLOGY_CHECK_TOPIC, &check);
            summary.subscriber_failures = summary.subscriber_failures.saturating_add(failures);
        }

        summary.edges_pruned = self.topology.decay().map_err(at(epoch))?;
        Ok(())
    }

    fn diffuse(
        &mut self,
        epoch: u64,
        source: AgentId,
        signal: f64,
        summary: &mut EpochSummary,
    ) -> Result<(), OrchestratorError> {
        let reached = match self.topology.resonate(source, signal) {
            Ok(reached) => reached,
            Err(err @ TopologyError::InvalidParameter { .. }) => {
                warn!(epoch, agent = %source, error = %err, "Resonance pulse rejected");
                return Ok(());
            }
            Err(err) => return Err(OrchestratorError::at_epoch(epoch, err)),
        };
        for (node, strength) in reached {
            if node == source {
                continue;
            }
            if let Some(slot) = self.agents.get_mut(&node)
                && slot.status == AgentStatus::Active
            {
                slot.derived.resonance += strength;
            }
        }
        summary.resonance_pulses = summary.resonance_pulses.saturating_add(1);
        Ok(())
    }

    /// Publish an orchestrator event. Returns the subscriber failure count.
    fn publish_event<T: Serialize>(&mut self, topic: &str, event: &T) -> usize {
        match serde_json::to_value(event) {
            Ok(payload) => self
                .bus
                .publish(topic, payload, ORCHESTRATOR_SOURCE)
                .failures
                .len(),
            Err(err) => {
                warn!(topic, error = %err, "Could not encode event, not published");
                0
            }
        }
    }

    /// Save the current state through the persistence adapter, if any.
    ///
    /// Returns whether a checkpoint was written.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Epoch`] with [`Component::Persistence`]
    /// if the adapter fails, or [`OrchestratorError::Halted`] rather than
    /// saving the state of a failed epoch.
    pub fn checkpoint(&mut self) -> Result<bool, OrchestratorError> {
        self.ensure_not_halted()?;
        if self.persistence.is_none() {
            return Ok(false);
        }
        let epoch = self.clock.epoch();
        let state = self.to_dict()?;
        if let Some(adapter) = self.persistence.as_mut() {
            adapter.save(epoch, &state).map_err(at(epoch))?;
        }
        self.last_checkpoint = Some(epoch);
        info!(epoch, "Checkpoint saved");
        Ok(true)
    }

    // -------------------------------------------------------------------
    // Agent lifecycle
    // -------------------------------------------------------------------

    /// Add a new agent with an empty store and a configured personality.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DuplicateAgent`] if the id is taken.
    pub fn add_agent(&mut self, id: AgentId) -> Result<(), OrchestratorError> {
        if self.agents.contains_key(&id) {
            return Err(OrchestratorError::DuplicateAgent(id));
        }
        let epoch = self.clock.epoch();
        let personality = self.initial_personality(id);
        let memory = MemoryStore::new(id, self.config.memory.capacity).map_err(at(epoch))?;
        self.attach_agent(id, memory, personality, AgentDerived::default())
            .map_err(at(epoch))?;
        info!(epoch, agent = %id, "Agent added");
        Ok(())
    }

    /// Remove an agent, destroying its store and graph node.
    ///
    /// Returns the agent's final state.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::UnknownAgent`] if there is no such agent
    /// - [`OrchestratorError::AgentFrozen`] while a handoff holds it
    pub fn remove_agent(&mut self, id: AgentId) -> Result<AgentRecord, OrchestratorError> {
        match self.agents.get(&id).map(|slot| slot.status) {
            None => return Err(OrchestratorError::UnknownAgent(id)),
            Some(AgentStatus::Frozen { .. }) => return Err(OrchestratorError::AgentFrozen(id)),
            Some(AgentStatus::Active) => {}
        }
        let record = self
            .detach_agent(id)
            .ok_or(OrchestratorError::UnknownAgent(id))?;
        info!(epoch = self.clock.epoch(), agent = %id, "Agent removed");
        Ok(record)
    }

    /// Register an agent: behaviour, inbox subscription, graph node.
    pub(crate) fn attach_agent(
        &mut self,
        id: AgentId,
        memory: MemoryStore,
        personality: Personality,
        derived: AgentDerived,
    ) -> Result<(), BusError> {
        let tx = self.inbox_tx.clone();
        let subscription = self.bus.subscribe(inbox_topic(id), move |message: &Message| {
            tx.send(Inbound {
                recipient: id,
                message: message.clone(),
            })
            .map_err(|e| SubscriberError::failed(e.to_string()))
        })?;
        self.topology.add_agent(id);
        let behavior = self.factory.create(id, &personality);
        self.agents.insert(
            id,
            AgentSlot {
                memory,
                personality,
                derived,
                status: AgentStatus::Active,
                behavior,
                subscription,
            },
        );
        Ok(())
    }

    /// Unregister an agent. Returns its final state.
    pub(crate) fn detach_agent(&mut self, id: AgentId) -> Option<AgentRecord> {
        let slot = self.agents.remove(&id)?;
        if let Err(err) = self.bus.unsubscribe(inbox_topic(id), slot.subscription) {
            warn!(agent = %id, error = %err, "Inbox subscription already gone");
        }
        self.topology.remove_agent(id);
        Some(slot.to_record(id))
    }

    fn initial_personality(&self, id: AgentId) -> Personality {
        agent::initial_personality(self.config.agents.personality, self.config.world.seed, id)
    }

    // -------------------------------------------------------------------
    // External subscribers
    // -------------------------------------------------------------------

    /// Subscribe an observer to a bus topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::RegistrySealed`] during an epoch.
    pub fn subscribe<F>(
        &mut self,
        topic: impl Into<Topic>,
        callback: F,
    ) -> Result<SubscriptionId, BusError>
    where
        F: FnMut(&Message) -> Result<(), SubscriberError> + Send + 'static,
    {
        self.bus.subscribe(topic, callback)
    }

    /// Remove an observer.
    ///
    /// # Errors
    ///
    /// See [`MessageBus::unsubscribe`].
    pub fn unsubscribe(
        &mut self,
        topic: impl Into<Topic>,
        id: SubscriptionId,
    ) -> Result<(), BusError> {
        self.bus.unsubscribe(topic, id)
    }

    // -------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------

    /// The run configuration.
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Index of the next epoch to run.
    pub const fn epoch(&self) -> u64 {
        self.clock.epoch()
    }

    /// Next logical timestamp.
    pub const fn logical_time(&self) -> u64 {
        self.clock.logical_time()
    }

    /// Identifier of this orchestrator instance, for log correlation.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The topology manager.
    pub const fn topology(&self) -> &TopologyManager {
        &self.topology
    }

    /// The message bus.
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Whether a failed epoch has halted this orchestrator.
    pub const fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Every agent id, ascending.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    /// An agent's memory store.
    pub fn memory(&self, id: AgentId) -> Option<&MemoryStore> {
        self.agents.get(&id).map(|slot| &slot.memory)
    }

    /// An agent's derived counters.
    pub fn derived(&self, id: AgentId) -> Option<&AgentDerived> {
        self.agents.get(&id).map(|slot| &slot.derived)
    }

    /// Whether an in-flight handoff holds the agent.
    pub fn is_frozen(&self, id: AgentId) -> bool {
        self.agents
            .get(&id)
            .is_some_and(|slot| matches!(slot.status, AgentStatus::Frozen { .. }))
    }

    fn is_active(&self, id: AgentId) -> bool {
        self.agents
            .get(&id)
            .is_some_and(|slot| slot.status == AgentStatus::Active)
    }

    fn active_agents(&self) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|(_, slot)| slot.status == AgentStatus::Active)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl core::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run_id", &self.run_id)
            .field("clock", &self.clock)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("topology", &self.topology)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Build a fresh orchestrator and run it to completion.
///
/// # Errors
///
/// See [`Orchestrator::new`] and [`Orchestrator::run`].
pub fn run<F>(config: SimulationConfig, factory: F) -> Result<SimulationResult, OrchestratorError>
where
    F: AgentFactory + 'static,
{
    Orchestrator::new(config, factory)?.run()
}

/// Log how a run ended.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        reason = ?result.end_reason,
        completed = result.simulation_completed,
        epochs_executed = result.epochs_executed,
        final_epoch = result.final_state.epoch,
        agents = result.final_state.agents.len(),
        "Simulation ended"
    );

    if let Some(check) = result.topology_checks.last() {
        info!(
            epoch = check.epoch,
            components = check.partition.count(),
            "Last topology check"
        );
    }
    if result.epochs.is_empty() {
        warn!("Simulation ended with no epochs executed");
    }
}
