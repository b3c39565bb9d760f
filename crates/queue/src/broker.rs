//! Broker publishing/subscription abstraction (mechanics only).
//!
//! The queue sits between ingress and storage:
//!
//! ```text
//! HTTP → Validator → PublishChannel ─┐
//!                                    ▼
//!                              named queue
//!                                    │
//!           ┌────────────────────────┼────────────────────────┐
//!           ▼                        ▼                        ▼
//!     Subscription #1          Subscription #2     ...  Subscription #N
//! ```
//!
//! Subscriptions on the same queue are **competing consumers**: each message is
//! delivered to exactly one of them. Delivery is at-least-once from the broker's
//! point of view; with [`AckMode::Immediate`] a message counts as delivered as
//! soon as it enters the subscription's buffer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("broker command failed: {0}")]
    Command(String),

    #[error("channel or broker is closed")]
    Closed,

    #[error("queue `{0}` has not been declared")]
    QueueNotFound(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),
}

/// When a delivery is acknowledged to the broker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Acknowledged the moment it is handed to the subscriber. A crash before the
    /// write completes loses the message.
    #[default]
    Immediate,
    /// Acknowledged explicitly via [`Subscription::ack`] once processed.
    AfterProcessing,
}

impl AckMode {
    pub fn from_ack_before_write(ack_before_write: bool) -> Self {
        if ack_before_write {
            Self::Immediate
        } else {
            Self::AfterProcessing
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub consumer_name: String,
    /// Maximum delivered-but-unprocessed messages held by this subscription.
    pub prefetch: u16,
    pub ack_mode: AckMode,
}

impl SubscribeOptions {
    pub fn new(consumer_name: impl Into<String>, prefetch: u16) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            prefetch,
            ack_mode: AckMode::Immediate,
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    /// Prefetch as a channel bound; zero is treated as one.
    pub fn buffer_size(&self) -> usize {
        usize::from(self.prefetch.max(1))
    }
}

/// One message handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
}

/// Broker-side acknowledgement for [`AckMode::AfterProcessing`] subscriptions.
pub trait Acknowledger: Send + Sync {
    fn ack(&self, delivery_id: &str) -> Result<(), QueueError>;

    /// Called for every delivery the subscriber takes out of the buffer, in
    /// either ack mode.
    fn received(&self, _delivery_id: &str) {}
}

/// A consumer's view of one queue.
///
/// Designed for single-threaded consumption; one worker owns one subscription.
/// Dropping the subscription stops the broker from handing it more messages and
/// discards whatever was still buffered; call [`Subscription::cancel`] and drain
/// first to keep those.
pub struct Subscription {
    receiver: Receiver<Delivery>,
    ack_mode: AckMode,
    acker: Option<Box<dyn Acknowledger>>,
    cancelled: Arc<AtomicBool>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("ack_mode", &self.ack_mode)
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

impl Subscription {
    /// `cancelled` is raised when the subscription is dropped so the feeding
    /// side can stop.
    pub fn new(
        receiver: Receiver<Delivery>,
        ack_mode: AckMode,
        acker: Option<Box<dyn Acknowledger>>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            receiver,
            ack_mode,
            acker,
            cancelled,
        }
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Block for up to `timeout` waiting for a delivery.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Delivery, RecvTimeoutError> {
        let delivery = self.receiver.recv_timeout(timeout)?;
        if let Some(acker) = &self.acker {
            acker.received(&delivery.id);
        }
        Ok(delivery)
    }

    /// Stop the broker from handing this subscription new messages.
    ///
    /// Deliveries already buffered stay receivable; once the feeding side has
    /// handed over what it holds, `recv_timeout` reports `Disconnected`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Acknowledge a processed delivery. No-op in [`AckMode::Immediate`].
    pub fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        match (self.ack_mode, &self.acker) {
            (AckMode::AfterProcessing, Some(acker)) => acker.ack(&delivery.id),
            _ => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// A publish handle. Not shared between threads while in use.
pub trait PublishChannel: Send {
    /// Fire-and-forget publish of one payload to `queue`.
    fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), QueueError>;

    fn is_open(&self) -> bool;
}

/// A message broker hosting named queues.
pub trait MessageBroker: Send + Sync {
    type Channel: PublishChannel + 'static;

    /// Create `queue` if it does not exist yet. Idempotent.
    fn declare_queue(&self, queue: &str) -> Result<(), QueueError>;

    fn create_channel(&self) -> Result<Self::Channel, QueueError>;

    fn subscribe(&self, queue: &str, options: SubscribeOptions) -> Result<Subscription, QueueError>;
}

impl<B> MessageBroker for Arc<B>
where
    B: MessageBroker + ?Sized,
{
    type Channel = B::Channel;

    fn declare_queue(&self, queue: &str) -> Result<(), QueueError> {
        (**self).declare_queue(queue)
    }

    fn create_channel(&self) -> Result<Self::Channel, QueueError> {
        (**self).create_channel()
    }

    fn subscribe(&self, queue: &str, options: SubscribeOptions) -> Result<Subscription, QueueError> {
        (**self).subscribe(queue, options)
    }
}
