//! Type-safe identifier wrappers.
//!
//! Agents are identified by a plain `u64` so that seeds, interaction
//! schedules, and checkpoints stay reproducible across runs. Identifiers
//! that only label an occurrence (a handoff attempt, a simulation run) use
//! UUID v7 (time-ordered) and never feed into simulation outcomes.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for one agent handoff attempt.
    HandoffId
}

define_id! {
    /// Unique identifier for one orchestrator run (log correlation only).
    RunId
}

/// Identifier of an agent in the simulation.
///
/// Serialized transparently as a bare integer, so the persisted layout reads
/// `{"id": 7, ...}` and graph edges read `[1, 2, 0.5]`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct AgentId(pub u64);

impl AgentId {
    /// Return the inner integer value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for AgentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

impl From<u64> for AgentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_distinct() {
        let a = HandoffId::new();
        let b = HandoffId::new();
        assert_ne!(a, b);
        assert_ne!(a.into_inner(), Uuid::nil());
    }

    #[test]
    fn agent_id_serializes_as_integer() {
        let json = serde_json::to_string(&AgentId(42)).ok();
        assert_eq!(json.as_deref(), Some("42"));
    }

    #[test]
    fn agent_id_display() {
        assert_eq!(AgentId(3).to_string(), "agent-3");
    }

    #[test]
    fn agent_ids_order_numerically() {
        let mut ids = vec![AgentId(10), AgentId(2), AgentId(7)];
        ids.sort();
        assert_eq!(ids, vec![AgentId(2), AgentId(7), AgentId(10)]);
    }
}
