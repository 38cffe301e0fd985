//! Broker port: the seam between this core and the message broker.
//!
//! The broker owns queue storage, locking, and redelivery. This core only
//! needs the capability set below: push delivery of new messages, a
//! non-destructive peek, and exclusive re-acquisition of deferred messages
//! by sequence number.

mod memory;

pub use memory::{DeadLetteredMessage, InMemoryBroker};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{DeadLetterReason, MessageState, SequenceNumber, TrackedProperties};
use crate::error::DeferqError;

/// Non-destructive snapshot of one queued message. No lock is taken.
#[derive(Debug, Clone)]
pub struct PeekedMessage {
    pub seq: SequenceNumber,
    pub state: MessageState,
    pub properties: TrackedProperties,
}

/// Exclusive handle on one message.
///
/// At most one such handle exists per sequence number at any instant; the
/// broker enforces this, not in-process synchronization. Each disposal
/// method consumes the handle. Dropping a handle without disposing releases
/// the lock and leaves the message as it was.
#[async_trait]
pub trait MessageLease: Send + std::fmt::Debug {
    fn seq(&self) -> SequenceNumber;

    /// Mark the message deferred, merging the given properties. Properties
    /// not present in `props` are preserved.
    async fn defer(self: Box<Self>, props: TrackedProperties) -> Result<(), DeferqError>;

    /// Permanent removal, success path.
    async fn complete(self: Box<Self>) -> Result<(), DeferqError>;

    /// Move the message to the dead-letter channel with a recorded reason.
    async fn dead_letter(self: Box<Self>, reason: DeadLetterReason) -> Result<(), DeferqError>;
}

/// A newly visible message pushed by the subscription, delivered together
/// with its processing lock.
pub struct Delivery {
    pub seq: SequenceNumber,
    pub payload: serde_json::Value,
    pub handle: Box<dyn MessageLease>,
}

/// Stream of newly visible messages.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { rx }
    }

    /// Next delivery; `None` once the broker side has closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// Broker capability set required by this core.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Begin push delivery of newly visible messages. Deliveries for
    /// distinct messages may be handled concurrently; the same message is
    /// never delivered twice at once.
    async fn subscribe(&self) -> Result<Subscription, DeferqError>;

    /// Snapshot of up to `max` messages nearest the head of the queue,
    /// ordered by sequence number.
    async fn peek(&self, max: usize) -> Result<Vec<PeekedMessage>, DeferqError>;

    /// Exclusively re-acquire a deferred message. Fails with
    /// [`DeferqError::RaceLoss`] if the message was already finalized or
    /// another actor holds its lock.
    async fn receive_deferred(
        &self,
        seq: SequenceNumber,
    ) -> Result<Box<dyn MessageLease>, DeferqError>;
}
