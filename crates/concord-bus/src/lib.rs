//! In-process publish/subscribe bus for the Concord synchronization core.
//!
//! Topics are independent channels. Each channel keeps its subscribers in
//! registration order, a bounded FIFO of pending messages, and a monotonic
//! sequence counter. Delivery is synchronous and every callback runs behind
//! a guard: an error return or a panic from one subscriber is logged and
//! reported, and delivery continues with the next.
//!
//! The subscriber registry can be sealed for the duration of an epoch so
//! that the set of receivers is fixed while messages are dispatched.
//!
//! # Modules
//!
//! - [`bus`] -- [`MessageBus`]: registry, queues, and guarded dispatch.
//! - [`error`] -- Bus and subscriber error types.
//! - [`message`] -- [`Message`], [`Topic`], and subscription handles.

pub mod bus;
pub mod error;
pub mod message;

pub use bus::{BackpressurePolicy, Callback, DEFAULT_QUEUE_CAPACITY, DeliveryReport, MessageBus};
pub use error::{BusError, SubscriberError};
pub use message::{Message, SubscriptionId, Topic};
