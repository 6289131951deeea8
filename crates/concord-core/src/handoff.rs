//! Agent handoff between orchestrators.
//!
//! A handoff moves one agent from a source orchestrator to a destination
//! under freeze-until-acknowledged:
//!
//! 1. [`Orchestrator::begin_handoff`] freezes the agent on the source and
//!    returns a [`HandoffPacket`]. A frozen agent neither acts nor merges nor
//!    receives messages, so the packet stays an exact copy of it.
//! 2. The packet travels (as JSON, in [`Orchestrator::handoff_via`]).
//! 3. [`Orchestrator::accept_handoff`] reconstructs the agent on the
//!    destination and returns a [`HandoffAck`].
//! 4. [`Orchestrator::complete_handoff`] checks the ack and retires the source
//!    copy.
//!
//! Until step 4 succeeds the source stays authoritative; on any failure the
//! destination copy is discarded and [`Orchestrator::abort_handoff`] unfreezes
//! the source. Either way exactly one copy survives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use concord_bus::BusError;
use concord_memory::{MemoryError, MemoryStore};
use concord_types::{AgentId, HandoffId};

use crate::clock::EpochClock;
use crate::orchestrator::{AgentStatus, Orchestrator};
use crate::state::AgentRecord;

/// Errors raised by a handoff step. All are recoverable: the source copy
/// stays authoritative.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    /// The agent does not exist on this side.
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// A handoff of this agent is already in flight.
    #[error("agent {0} is already frozen by a handoff")]
    AlreadyFrozen(AgentId),

    /// No handoff of this agent is in flight.
    #[error("agent {0} is not frozen")]
    NotFrozen(AgentId),

    /// The acknowledgement does not match the in-flight handoff.
    #[error("acknowledgement for {agent_id} does not match: {reason}")]
    AckMismatch {
        /// The agent being handed off.
        agent_id: AgentId,
        /// What differs.
        reason: String,
    },

    /// The destination already has an agent with this id.
    #[error("destination already has agent {0}")]
    DuplicateAgent(AgentId),

    /// The packet's memory could not be rebuilt.
    #[error("could not reconstruct agent {agent_id}: {source}")]
    Reconstruction {
        /// The agent being handed off.
        agent_id: AgentId,
        /// The underlying store error.
        source: MemoryError,
    },

    /// The destination could not register the agent's inbox.
    #[error("could not register agent inbox: {0}")]
    Bus(#[from] BusError),

    /// The packet could not be encoded, sent, or decoded.
    #[error("handoff transport failed: {reason}")]
    Transport {
        /// Description of the failure.
        reason: String,
    },
}

/// Everything a destination needs to continue an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffPacket {
    /// Identifies this attempt.
    pub handoff_id: HandoffId,
    /// The agent's full state.
    pub agent: AgentRecord,
    /// Source epoch when the agent was frozen.
    pub source_epoch: u64,
    /// Wall-clock time the packet was created (informational).
    pub created_at: DateTime<Utc>,
}

/// Destination's confirmation that an agent was reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffAck {
    /// The attempt being acknowledged.
    pub handoff_id: HandoffId,
    /// The reconstructed agent.
    pub agent_id: AgentId,
    /// Entries held by the reconstructed store.
    pub entry_count: usize,
}

impl Orchestrator {
    /// Freeze `id` and capture it for transfer.
    ///
    /// # Errors
    ///
    /// [`HandoffError::UnknownAgent`] or [`HandoffError::AlreadyFrozen`].
    pub fn begin_handoff(&mut self, id: AgentId) -> Result<HandoffPacket, HandoffError> {
        let epoch = self.clock.epoch();
        let slot = self
            .agents
            .get_mut(&id)
            .ok_or(HandoffError::UnknownAgent(id))?;
        if matches!(slot.status, AgentStatus::Frozen { .. }) {
            return Err(HandoffError::AlreadyFrozen(id));
        }

        let agent = slot.to_record(id);
        let handoff_id = HandoffId::new();
        slot.status = AgentStatus::Frozen { handoff_id };
        let packet = HandoffPacket {
            handoff_id,
            agent,
            source_epoch: epoch,
            created_at: Utc::now(),
        };
        info!(
            agent = %id,
            %handoff_id,
            epoch,
            entries = packet.agent.memory.len(),
            "Handoff started, agent frozen"
        );
        Ok(packet)
    }

    /// Reconstruct a handed-off agent here.
    ///
    /// The local logical clock is moved past every timestamp in the packet
    /// so later local entries stay newer than the imported ones.
    ///
    /// # Errors
    ///
    /// - [`HandoffError::DuplicateAgent`] if the id is already present
    /// - [`HandoffError::Reconstruction`] if the memory is inconsistent
    /// - [`HandoffError::Bus`] if the inbox cannot be registered
    pub fn accept_handoff(&mut self, packet: HandoffPacket) -> Result<HandoffAck, HandoffError> {
        let HandoffPacket {
            handoff_id, agent, ..
        } = packet;
        let id = agent.id;
        if self.agents.contains_key(&id) {
            return Err(HandoffError::DuplicateAgent(id));
        }

        let newest = agent.memory.iter().map(|e| e.timestamp).max();
        let memory = MemoryStore::from_parts(id, agent.capacity, agent.next_sequence, agent.memory)
            .map_err(|source| HandoffError::Reconstruction { agent_id: id, source })?;
        let entry_count = memory.len();

        self.attach_agent(id, memory, agent.personality, agent.derived_fields)?;
        if let Some(newest) = newest
            && newest >= self.clock.logical_time()
        {
            self.clock = EpochClock::from_parts(self.clock.epoch(), newest.saturating_add(1));
        }

        info!(agent = %id, %handoff_id, entries = entry_count, "Handoff accepted");
        Ok(HandoffAck {
            handoff_id,
            agent_id: id,
            entry_count,
        })
    }

    /// Retire the source copy after a matching acknowledgement.
    ///
    /// Returns the retired state.
    ///
    /// # Errors
    ///
    /// - [`HandoffError::UnknownAgent`] if the agent is gone
    /// - [`HandoffError::NotFrozen`] if no handoff is in flight
    /// - [`HandoffError::AckMismatch`] if the ack names another attempt or
    ///   reports a different entry count; the agent stays frozen
    pub fn complete_handoff(&mut self, ack: &HandoffAck) -> Result<AgentRecord, HandoffError> {
        let id = ack.agent_id;
        let slot = self.agents.get(&id).ok_or(HandoffError::UnknownAgent(id))?;
        let AgentStatus::Frozen { handoff_id } = slot.status else {
            return Err(HandoffError::NotFrozen(id));
        };
        if handoff_id != ack.handoff_id {
            return Err(HandoffError::AckMismatch {
                agent_id: id,
                reason: format!("expected handoff {handoff_id}, got {}", ack.handoff_id),
            });
        }
        if slot.memory.len() != ack.entry_count {
            return Err(HandoffError::AckMismatch {
                agent_id: id,
                reason: format!(
                    "source holds {} entries, destination reported {}",
                    slot.memory.len(),
                    ack.entry_count
                ),
            });
        }

        let record = self.detach_agent(id).ok_or(HandoffError::UnknownAgent(id))?;
        info!(agent = %id, %handoff_id, "Handoff completed, source copy retired");
        Ok(record)
    }

    /// Unfreeze the source copy; it is authoritative again.
    ///
    /// # Errors
    ///
    /// [`HandoffError::UnknownAgent`] or [`HandoffError::NotFrozen`].
    pub fn abort_handoff(&mut self, id: AgentId) -> Result<(), HandoffError> {
        let slot = self
            .agents
            .get_mut(&id)
            .ok_or(HandoffError::UnknownAgent(id))?;
        let AgentStatus::Frozen { handoff_id } = slot.status else {
            return Err(HandoffError::NotFrozen(id));
        };
        slot.status = AgentStatus::Active;
        warn!(agent = %id, %handoff_id, "Handoff aborted, source copy restored");
        Ok(())
    }

    /// Move agent `id` to `destination` through a JSON round-trip.
    ///
    /// # Errors
    ///
    /// See [`handoff_via`](Self::handoff_via).
    pub fn handoff_to(
        &mut self,
        destination: &mut Self,
        id: AgentId,
    ) -> Result<HandoffAck, HandoffError> {
        self.handoff_via(destination, id, Ok)
    }

    /// Move agent `id` to `destination`, passing the encoded packet through
    /// `transport`.
    ///
    /// On failure after the agent was frozen, the destination copy (if one
    /// was made) is discarded and the source is unfrozen before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Any [`HandoffError`] from the individual steps, or
    /// [`HandoffError::Transport`] if encoding, `transport`, or decoding fails.
    pub fn handoff_via<T>(
        &mut self,
        destination: &mut Self,
        id: AgentId,
        transport: T,
    ) -> Result<HandoffAck, HandoffError>
    where
        T: FnOnce(String) -> Result<String, HandoffError>,
    {
        let packet = self.begin_handoff(id)?;
        let outcome = send(&packet, transport).and_then(|received| {
            let ack = destination.accept_handoff(received)?;
            match self.complete_handoff(&ack) {
                Ok(_) => Ok(ack),
                Err(err) => {
                    destination.detach_agent(ack.agent_id);
                    Err(err)
                }
            }
        });

        if let Err(err) = &outcome {
            warn!(agent = %id, error = %err, "Handoff failed, rolling back");
            if let Err(abort_err) = self.abort_handoff(id) {
                warn!(agent = %id, error = %abort_err, "Could not unfreeze source copy");
            }
        }
        outcome
    }
}

fn send<T>(packet: &HandoffPacket, transport: T) -> Result<HandoffPacket, HandoffError>
where
    T: FnOnce(String) -> Result<String, HandoffError>,
{
    let encoded = serde_json::to_string(packet).map_err(|e| HandoffError::Transport {
        reason: format!("encode: {e}"),
    })?;
    let received = transport(encoded)?;
    serde_json::from_str(&received).map_err(|e| HandoffError::Transport {
        reason: format!("decode: {e}"),
    })
}
