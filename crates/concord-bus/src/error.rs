//! Error types for the `concord-bus` crate.

use crate::message::{SubscriptionId, Topic};

/// Errors returned by bus operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The registry is sealed; subscribe and unsubscribe are rejected until
    /// the next epoch boundary.
    #[error("subscriber registry is sealed (topic {topic})")]
    RegistrySealed {
        /// Topic the rejected change targeted.
        topic: Topic,
    },

    /// The handle does not name a subscriber of the topic.
    #[error("no subscription {id} on topic {topic}")]
    UnknownSubscription {
        /// The topic.
        topic: Topic,
        /// The handle that was not found.
        id: SubscriptionId,
    },

    /// A bounded queue was full under [`BackpressurePolicy::Reject`].
    ///
    /// [`BackpressurePolicy::Reject`]: crate::bus::BackpressurePolicy::Reject
    #[error("queue for topic {topic} is full ({capacity} pending)")]
    QueueFull {
        /// The topic.
        topic: Topic,
        /// Queue bound.
        capacity: usize,
    },

    /// A bus was configured with a zero queue capacity.
    #[error("queue capacity must be at least 1")]
    InvalidCapacity,
}

/// Failure reported by (or on behalf of) a single subscriber callback.
///
/// Never propagated to the publisher; collected into the delivery report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberError {
    /// The callback returned an error.
    #[error("subscriber failed: {reason}")]
    Failed {
        /// Description supplied by the callback.
        reason: String,
    },

    /// The callback panicked.
    #[error("subscriber panicked: {reason}")]
    Panicked {
        /// The panic message, when it was a string.
        reason: String,
    },
}

impl SubscriberError {
    /// Build a [`SubscriberError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}
