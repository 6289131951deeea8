//! Agent behaviour trait, factory, and the default personality-driven agent.
//!
//! During the Act phase the orchestrator presents each active agent with an
//! [`AgentContext`] and collects an [`AgentOutput`] in response. The
//! [`AgentBehavior`] trait abstracts how that output is produced: a scripted
//! bot, a learned policy, or a test stub. Behaviours never touch shared state
//! directly; everything they want to happen is described in the output and
//! applied by the orchestrator in later phases.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use concord_bus::Topic;
use concord_memory::MemoryStore;
use concord_types::{AgentId, Personality};

use crate::config::PersonalityMode;

/// Errors reported by an agent behaviour.
///
/// Recovered locally: the agent's output for the epoch is discarded.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The behaviour could not produce an output.
    #[error("agent {agent_id} failed to act: {reason}")]
    Behavior {
        /// The failing agent.
        agent_id: AgentId,
        /// Description of the failure.
        reason: String,
    },
}

/// Read-only view handed to an agent for one epoch.
#[derive(Debug)]
pub struct AgentContext<'a> {
    /// Epoch being executed.
    pub epoch: u64,
    /// The acting agent.
    pub agent_id: AgentId,
    /// The agent's personality.
    pub personality: &'a Personality,
    /// Other active agents, ascending.
    pub peers: &'a [AgentId],
    /// The agent's own memory.
    pub memory: &'a MemoryStore,
    /// Randomness seeded from `(seed, epoch, agent_id)`.
    pub rng: &'a mut StdRng,
}

/// Destination of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Direct message, recorded in the recipient's memory.
    Agent(AgentId),
    /// Named topic, observed only by external subscribers.
    Topic(Topic),
}

/// A message an agent wants sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Where it goes.
    pub to: Recipient,
    /// Message body.
    pub body: serde_json::Value,
}

/// Everything an agent wants to happen this epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    /// Payloads recorded into the agent's own memory.
    pub observations: Vec<serde_json::Value>,
    /// Messages to deliver through the bus.
    pub messages: Vec<OutboundMessage>,
    /// Peers interacted with; each strengthens the graph edge.
    pub interactions: Vec<AgentId>,
    /// Peers to run a pairwise memory merge with.
    pub sync_with: Vec<AgentId>,
    /// Resonance signal to diffuse from this agent.
    pub resonance: Option<f64>,
}

/// Produces an agent's output each epoch.
pub trait AgentBehavior: Send {
    /// Decide what the agent does this epoch.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] if no output can be produced. The orchestrator
    /// logs the error and the agent sits the epoch out.
    fn act(&mut self, ctx: AgentContext<'_>) -> Result<AgentOutput, AgentError>;
}

/// Creates behaviours for new, restored, and handed-off agents.
pub trait AgentFactory: Send {
    /// Build the behaviour for agent `id`.
    fn create(&self, id: AgentId, personality: &Personality) -> Box<dyn AgentBehavior>;
}

/// Factory for [`PersonalityAgent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAgentFactory;

impl DefaultAgentFactory {
    /// Create a new default factory.
    pub const fn new() -> Self {
        Self
    }
}

impl AgentFactory for DefaultAgentFactory {
    fn create(&self, _id: AgentId, personality: &Personality) -> Box<dyn AgentBehavior> {
        Box::new(PersonalityAgent::new(*personality))
    }
}

/// Agent whose choices are coin flips weighted by its personality.
///
/// Per epoch, independently:
///
/// - `curiosity`: record an observation
/// - `sociability`: interact with a random peer, and with probability
///   `expressiveness` also send it a direct message
/// - `cooperation`: request a memory sync with a random peer
/// - `expressiveness / 2`: emit a unit resonance pulse
#[derive(Debug, Clone, Copy)]
pub struct PersonalityAgent {
    personality: Personality,
}

impl PersonalityAgent {
    /// Create an agent with the given personality.
    pub const fn new(personality: Personality) -> Self {
        Self { personality }
    }
}

impl AgentBehavior for PersonalityAgent {
    fn act(&mut self, ctx: AgentContext<'_>) -> Result<AgentOutput, AgentError> {
        let p = self.personality;
        let rng = ctx.rng;
        let mut out = AgentOutput::default();

        if rng.random_bool(p.curiosity()) {
            out.observations.push(json!({
                "kind": "observation",
                "epoch": ctx.epoch,
                "reading": rng.random_range(0..1000_u32),
            }));
        }

        if rng.random_bool(p.sociability())
            && let Some(peer) = pick(rng, ctx.peers)
        {
            out.interactions.push(peer);
            if rng.random_bool(p.expressiveness()) {
                out.messages.push(OutboundMessage {
                    to: Recipient::Agent(peer),
                    body: json!({ "greeting": ctx.epoch, "known": ctx.memory.len() }),
                });
            }
        }

        if rng.random_bool(p.cooperation())
            && let Some(peer) = pick(rng, ctx.peers)
        {
            out.sync_with.push(peer);
        }

        if rng.random_bool(p.expressiveness() * 0.5) {
            out.resonance = Some(1.0);
        }

        Ok(out)
    }
}

fn pick(rng: &mut StdRng, peers: &[AgentId]) -> Option<AgentId> {
    if peers.is_empty() {
        return None;
    }
    peers.get(rng.random_range(0..peers.len())).copied()
}

/// RNG for one agent in one epoch.
///
/// Depends only on `(seed, epoch, id)`, so a run resumed from a checkpoint
/// draws exactly what the uninterrupted run would have drawn.
pub fn agent_rng(seed: u64, epoch: u64, id: AgentId) -> StdRng {
    StdRng::seed_from_u64(mix(mix(seed, epoch), id.into_inner()))
}

/// Personality for a freshly created agent.
pub fn initial_personality(mode: PersonalityMode, seed: u64, id: AgentId) -> Personality {
    match mode {
        PersonalityMode::Balanced => Personality::balanced(),
        PersonalityMode::Seeded => {
            let mut rng = StdRng::seed_from_u64(mix(seed ^ 0x5EED, id.into_inner()));
            Personality::new(
                rng.random_range(0.0..=1.0),
                rng.random_range(0.0..=1.0),
                rng.random_range(0.0..=1.0),
                rng.random_range(0.0..=1.0),
            )
            .unwrap_or_default()
        }
    }
}

/// 64-bit mixing step (splitmix-style) for deriving independent seeds.
const fn mix(a: u64, b: u64) -> u64 {
    (a ^ b.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .rotate_left(27)
        .wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn run_once(personality: Personality, seed: u64, peers: &[AgentId]) -> AgentOutput {
        let memory = MemoryStore::new(AgentId(0), 4).unwrap();
        let mut rng = agent_rng(seed, 3, AgentId(0));
        let mut agent = PersonalityAgent::new(personality);
        agent
            .act(AgentContext {
                epoch: 3,
                agent_id: AgentId(0),
                personality: &personality,
                peers,
                memory: &memory,
                rng: &mut rng,
            })
            .unwrap()
    }

    #[test]
    fn same_seed_same_output() {
        let peers = [AgentId(1), AgentId(2), AgentId(3)];
        let p = Personality::balanced();
        assert_eq!(run_once(p, 9, &peers), run_once(p, 9, &peers));
    }

    #[test]
    fn saturated_personality_does_everything() {
        let p = Personality::new(1.0, 1.0, 1.0, 1.0).unwrap();
        let out = run_once(p, 1, &[AgentId(5)]);
        assert_eq!(out.observations.len(), 1);
        assert_eq!(out.interactions, vec![AgentId(5)]);
        assert_eq!(out.sync_with, vec![AgentId(5)]);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].to, Recipient::Agent(AgentId(5)));
    }

    #[test]
    fn inert_personality_does_nothing() {
        let p = Personality::new(0.0, 0.0, 0.0, 0.0).unwrap();
        let out = run_once(p, 1, &[AgentId(5)]);
        assert_eq!(out, AgentOutput::default());
    }

    #[test]
    fn lonely_agent_never_targets_a_peer() {
        let p = Personality::new(1.0, 0.0, 1.0, 0.0).unwrap();
        let out = run_once(p, 4, &[]);
        assert!(out.interactions.is_empty());
        assert!(out.sync_with.is_empty());
    }

    #[test]
    fn agent_rng_differs_by_epoch_and_agent() {
        let a: u64 = agent_rng(1, 0, AgentId(0)).random();
        let b: u64 = agent_rng(1, 1, AgentId(0)).random();
        let c: u64 = agent_rng(1, 0, AgentId(1)).random();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn seeded_personalities_are_reproducible() {
        let a = initial_personality(PersonalityMode::Seeded, 42, AgentId(7));
        let b = initial_personality(PersonalityMode::Seeded, 42, AgentId(7));
        assert_eq!(a, b);
        assert_eq!(
            initial_personality(PersonalityMode::Balanced, 42, AgentId(7)),
            Personality::balanced()
        );
    }
}
