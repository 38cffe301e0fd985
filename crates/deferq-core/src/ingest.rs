//! Ingestion: first sight of a message, hand-off and initial deferral.

use std::sync::Arc;

use chrono::Utc;

use crate::broker::Delivery;
use crate::config::ServiceConfig;
use crate::domain::{TrackedProperties, WorkItem};
use crate::error::DeferqError;
use crate::queue::WorkQueue;

/// Handles newly delivered messages.
///
/// Invocations for distinct messages may overlap; the same message is never
/// handled twice at once (the broker guarantees single delivery per lock).
pub struct IngestionHandler {
    queue: Arc<WorkQueue>,
    completion_budget: chrono::Duration,
}

impl IngestionHandler {
    pub fn new(queue: Arc<WorkQueue>, config: &ServiceConfig) -> Self {
        Self {
            queue,
            completion_budget: config.completion_budget(),
        }
    }

    /// Handle one newly visible message: push the work item, then defer the
    /// message with `expected_completion = now + 2 × expected processing
    /// time`, touching no other property.
    ///
    /// This never completes or abandons the message. A defer failure
    /// propagates to the caller's error channel; the message stays with the
    /// broker's own redelivery policy.
    pub async fn handle(&self, delivery: Delivery) -> Result<(), DeferqError> {
        let Delivery {
            seq,
            payload,
            handle,
        } = delivery;

        tracing::info!(%seq, "received message, queueing for processing");
        self.queue.push(WorkItem::new(seq, payload)).await?;

        let deadline = Utc::now() + self.completion_budget;
        handle
            .defer(TrackedProperties::with_expected_completion(deadline))
            .await?;
        tracing::info!(%seq, %deadline, "deferred with expected completion");

        Ok(())
    }
}
