//! Messages, topics, and subscription handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a bus channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A published message. Ephemeral: never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<P = serde_json::Value> {
    /// Channel the message was published on.
    pub topic: Topic,
    /// Opaque payload.
    pub payload: P,
    /// Wall-clock publish time (informational only).
    pub publish_time: DateTime<Utc>,
    /// Free-form publisher label, e.g. `agent-3` or `orchestrator`.
    pub source: String,
    /// Per-topic sequence number, monotonic from 0.
    pub sequence: u64,
}
