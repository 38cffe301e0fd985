use serde::{Deserialize, Serialize};

use super::SequenceNumber;

/// Hand-off value between ingestion and the worker pool.
///
/// Created when a message first becomes visible; owned by the work queue
/// until exactly one worker claims it; dropped after the message reaches a
/// terminal disposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    seq: SequenceNumber,
    payload: serde_json::Value,
}

impl WorkItem {
    pub fn new(seq: SequenceNumber, payload: serde_json::Value) -> Self {
        Self { seq, payload }
    }

    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
