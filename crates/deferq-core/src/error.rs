use thiserror::Error;

use crate::domain::SequenceNumber;

#[derive(Debug, Error)]
pub enum DeferqError {
    /// Network, auth, or broker-side failure of a queue operation.
    #[error("broker {op} failed: {message}")]
    Broker { op: &'static str, message: String },

    /// A re-acquire lost the race: another actor already finalized the
    /// message or holds its exclusive lock. Benign, never escalated.
    #[error("message {0} already finalized or locked by another actor")]
    RaceLoss(SequenceNumber),

    /// A deferred message was observed without its required deadline
    /// metadata. Always routed to dead-lettering, never retried.
    #[error("deferred message {0} has no expected completion time")]
    ProtocolViolation(SequenceNumber),

    /// Push onto a work queue that has been closed for shutdown.
    #[error("work queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

impl DeferqError {
    pub fn broker(op: &'static str, message: impl Into<String>) -> Self {
        DeferqError::Broker {
            op,
            message: message.into(),
        }
    }

    /// Is this the benign lost-the-race case?
    pub fn is_race_loss(&self) -> bool {
        matches!(self, DeferqError::RaceLoss(_))
    }
}
