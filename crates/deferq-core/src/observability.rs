use serde::{Deserialize, Serialize};

/// Message counts by disposition, as reported by a broker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerCounts {
    pub active: usize,
    pub deferred: usize,
    pub completed: usize,
    pub dead_lettered: usize,
}
