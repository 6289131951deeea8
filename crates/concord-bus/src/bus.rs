//! Topic registry, bounded queues, and guarded synchronous dispatch.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BusError, SubscriberError};
use crate::message::{Message, SubscriptionId, Topic};

/// Default bound on pending messages per topic.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Subscriber callback.
pub type Callback<P> = Box<dyn FnMut(&Message<P>) -> Result<(), SubscriberError> + Send>;

/// What `enqueue` does when a topic's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Refuse the new message with [`BusError::QueueFull`].
    #[default]
    Reject,
    /// Discard the oldest pending message to make room.
    DropOldest,
}

/// Outcome of delivering one message to the current subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// The topic.
    pub topic: Topic,
    /// The message's per-topic sequence number.
    pub sequence: u64,
    /// Subscribers that handled the message successfully.
    pub delivered: usize,
    /// Subscribers that failed, in registration order.
    pub failures: Vec<(SubscriptionId, SubscriberError)>,
}

impl DeliveryReport {
    /// Whether every subscriber succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Subscriber<P> {
    id: SubscriptionId,
    callback: Callback<P>,
}

struct Pending<P> {
    sequence: u64,
    payload: P,
    source: String,
    publish_time: DateTime<Utc>,
}

struct Channel<P> {
    subscribers: Vec<Subscriber<P>>,
    queue: VecDeque<Pending<P>>,
    next_sequence: u64,
}

impl<P> Channel<P> {
    const fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            queue: VecDeque::new(),
            next_sequence: 0,
        }
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        sequence
    }
}

/// Topic-based publish/subscribe bus.
///
/// Owned by a single coordinator; not shared between threads. Callbacks must
/// be `Send` so the owning orchestrator can move to a worker thread.
///
/// A topic is live while it has subscribers or pending messages. Once idle
/// it is dropped along with its sequence counter, so numbering on a topic
/// nobody listens to restarts from zero.
pub struct MessageBus<P = serde_json::Value> {
    channels: BTreeMap<Topic, Channel<P>>,
    next_subscription: u64,
    queue_capacity: usize,
    policy: BackpressurePolicy,
    sealed: bool,
}

impl<P> MessageBus<P> {
    /// Create a bus with the given per-topic queue bound and policy.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidCapacity`] if `queue_capacity` is zero.
    pub fn new(queue_capacity: usize, policy: BackpressurePolicy) -> Result<Self, BusError> {
        if queue_capacity == 0 {
            return Err(BusError::InvalidCapacity);
        }
        Ok(Self {
            channels: BTreeMap::new(),
            next_subscription: 0,
            queue_capacity,
            policy,
            sealed: false,
        })
    }

    // -------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------

    /// Register `callback` on `topic`. Callbacks run in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::RegistrySealed`] while the registry is sealed.
    pub fn subscribe<F>(
        &mut self,
        topic: impl Into<Topic>,
        callback: F,
    ) -> Result<SubscriptionId, BusError>
    where
        F: FnMut(&Message<P>) -> Result<(), SubscriberError> + Send + 'static,
    {
        let topic = topic.into();
        if self.sealed {
            return Err(BusError::RegistrySealed { topic });
        }
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription = self.next_subscription.saturating_add(1);
        debug!(%topic, subscription = %id, "subscribed");
        self.channels
            .entry(topic)
            .or_insert_with(Channel::new)
            .subscribers
            .push(Subscriber {
                id,
                callback: Box::new(callback),
            });
        Ok(id)
    }

    /// Remove a subscription.
    ///
    /// # Errors
    ///
    /// - [`BusError::RegistrySealed`] while the registry is sealed
    /// - [`BusError::UnknownSubscription`] if `id` is not subscribed to `topic`
    pub fn unsubscribe(
        &mut self,
        topic: impl Into<Topic>,
        id: SubscriptionId,
    ) -> Result<(), BusError> {
        let topic = topic.into();
        if self.sealed {
            return Err(BusError::RegistrySealed { topic });
        }
        let removed = self.channels.get_mut(&topic).and_then(|channel| {
            let pos = channel.subscribers.iter().position(|s| s.id == id)?;
            Some(channel.subscribers.remove(pos))
        });
        if removed.is_none() {
            return Err(BusError::UnknownSubscription { topic, id });
        }
        debug!(%topic, subscription = %id, "unsubscribed");
        self.prune(&topic);
        Ok(())
    }

    /// Freeze the registry until [`unseal`](Self::unseal).
    pub const fn seal(&mut self) {
        self.sealed = true;
    }

    /// Allow registry changes again.
    pub const fn unseal(&mut self) {
        self.sealed = false;
    }

    /// Whether the registry is sealed.
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.channels.get(topic).map_or(0, |c| c.subscribers.len())
    }

    /// Number of messages waiting on `topic`.
    pub fn pending(&self, topic: &Topic) -> usize {
        self.channels.get(topic).map_or(0, |c| c.queue.len())
    }

    /// Total messages waiting across all topics.
    pub fn pending_total(&self) -> usize {
        self.channels.values().map(|c| c.queue.len()).sum()
    }

    /// Per-topic queue bound.
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Number of live topics.
    pub fn topic_count(&self) -> usize {
        self.channels.len()
    }

    /// Next sequence number of every live topic.
    pub fn sequences(&self) -> BTreeMap<Topic, u64> {
        self.channels
            .iter()
            .map(|(topic, channel)| (topic.clone(), channel.next_sequence))
            .collect()
    }

    /// Resume numbering from [`sequences`](Self::sequences) of an earlier
    /// bus. Topics without subscribers stay live until the next publish,
    /// flush, or unsubscribe.
    pub fn restore_sequences(&mut self, sequences: impl IntoIterator<Item = (Topic, u64)>) {
        for (topic, next) in sequences {
            self.channels.entry(topic).or_insert_with(Channel::new).next_sequence = next;
        }
    }

    fn prune(&mut self, topic: &Topic) {
        if self
            .channels
            .get(topic)
            .is_some_and(|c| c.subscribers.is_empty() && c.queue.is_empty())
        {
            self.channels.remove(topic);
        }
    }

    // -------------------------------------------------------------------
    // Delivery
    // -------------------------------------------------------------------

    /// Deliver a message to every current subscriber of `topic` immediately.
    ///
    /// Publishing to a topic with no subscribers reports zero deliveries.
    pub fn publish(
        &mut self,
        topic: impl Into<Topic>,
        payload: P,
        source: impl Into<String>,
    ) -> DeliveryReport {
        let topic = topic.into();
        let channel = self.channels.entry(topic.clone()).or_insert_with(Channel::new);
        let message = Message {
            topic,
            payload,
            publish_time: Utc::now(),
            source: source.into(),
            sequence: channel.take_sequence(),
        };
        let report = dispatch(&mut channel.subscribers, &message);
        if channel.subscribers.is_empty() && channel.queue.is_empty() {
            self.channels.remove(&report.topic);
        }
        report
    }

    /// Queue a message on `topic` for the next [`flush`](Self::flush).
    ///
    /// Returns the sequence number assigned to the message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::QueueFull`] if the queue is at capacity and the
    /// policy is [`BackpressurePolicy::Reject`].
    pub fn enqueue(
        &mut self,
        topic: impl Into<Topic>,
        payload: P,
        source: impl Into<String>,
    ) -> Result<u64, BusError> {
        let topic = topic.into();
        let capacity = self.queue_capacity;
        let policy = self.policy;
        let channel = self.channels.entry(topic.clone()).or_insert_with(Channel::new);

        if channel.queue.len() >= capacity {
            match policy {
                BackpressurePolicy::Reject => {
                    return Err(BusError::QueueFull { topic, capacity });
                }
                BackpressurePolicy::DropOldest => {
                    if let Some(dropped) = channel.queue.pop_front() {
                        warn!(%topic, sequence = dropped.sequence, capacity,
                            "queue full, dropping oldest pending message");
                    }
                }
            }
        }

        let sequence = channel.take_sequence();
        channel.queue.push_back(Pending {
            sequence,
            payload,
            source: source.into(),
            publish_time: Utc::now(),
        });
        Ok(sequence)
    }

    /// Drain every queue, topic by topic in name order, FIFO within a topic.
    /// Topics left idle are dropped.
    pub fn flush(&mut self) -> Vec<DeliveryReport> {
        let mut reports = Vec::new();
        for (topic, channel) in &mut self.channels {
            while let Some(pending) = channel.queue.pop_front() {
                let message = Message {
                    topic: topic.clone(),
                    payload: pending.payload,
                    publish_time: pending.publish_time,
                    source: pending.source,
                    sequence: pending.sequence,
                };
                reports.push(dispatch(&mut channel.subscribers, &message));
            }
        }
        self.channels
            .retain(|_, channel| !channel.subscribers.is_empty() || !channel.queue.is_empty());
        reports
    }
}

impl<P> Default for MessageBus<P> {
    fn default() -> Self {
        Self {
            channels: BTreeMap::new(),
            next_subscription: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            policy: BackpressurePolicy::default(),
            sealed: false,
        }
    }
}

impl<P> core::fmt::Debug for MessageBus<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let topics: Vec<(&str, usize, usize)> = self
            .channels
            .iter()
            .map(|(t, c)| (t.as_str(), c.subscribers.len(), c.queue.len()))
            .collect();
        f.debug_struct("MessageBus")
            .field("topics", &topics)
            .field("queue_capacity", &self.queue_capacity)
            .field("policy", &self.policy)
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

/// Run every subscriber on `message`, containing errors and panics.
fn dispatch<P>(subscribers: &mut [Subscriber<P>], message: &Message<P>) -> DeliveryReport {
    let mut delivered: usize = 0;
    let mut failures = Vec::new();

    for subscriber in subscribers.iter_mut() {
        let callback = &mut subscriber.callback;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(message)));
        let error = match outcome {
            Ok(Ok(())) => {
                delivered = delivered.saturating_add(1);
                continue;
            }
            Ok(Err(err)) => err,
            Err(panic_payload) => SubscriberError::Panicked {
                reason: panic_reason(panic_payload.as_ref()),
            },
        };
        warn!(
            topic = %message.topic,
            sequence = message.sequence,
            subscription = %subscriber.id,
            error = %error,
            "subscriber failed, continuing delivery"
        );
        failures.push((subscriber.id, error));
    }

    DeliveryReport {
        topic: message.topic.clone(),
        sequence: message.sequence,
        delivered,
        failures,
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("non-string panic payload")
    }
}
