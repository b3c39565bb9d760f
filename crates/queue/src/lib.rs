//! Message queue abstraction between ingress and the consumer workers.
//!
//! Publishers hold a [`PublishChannel`]; consumers hold a [`Subscription`]
//! whose delivery buffer is capped by the prefetch count.

pub mod broker;
pub mod in_memory;

pub use broker::{
    AckMode, Acknowledger, Delivery, MessageBroker, PublishChannel, QueueError, SubscribeOptions,
    Subscription,
};
pub use in_memory::{InMemoryBroker, InMemoryChannel};
