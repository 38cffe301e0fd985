//! Tracked message properties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Properties this core tracks on a deferred message.
///
/// A typed structure instead of a string-keyed bag, with explicit
/// merge-on-write semantics: deferring with a partial value overwrites only
/// the fields that are present and preserves the rest.
///
/// - `expected_completion` is written once by the first deferral and never
///   modified afterward.
/// - `percent_done` is advisory and overwritten on every progress tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackedProperties {
    pub expected_completion: Option<DateTime<Utc>>,
    pub percent_done: Option<f64>,
}

impl TrackedProperties {
    /// Properties carrying only an expected-completion deadline.
    pub fn with_expected_completion(deadline: DateTime<Utc>) -> Self {
        Self {
            expected_completion: Some(deadline),
            ..Self::default()
        }
    }

    /// Properties carrying only a progress percentage.
    pub fn with_percent_done(percent: f64) -> Self {
        Self {
            percent_done: Some(percent),
            ..Self::default()
        }
    }

    /// Merge `update` into `self`, field by field. Fields absent from
    /// `update` keep their current value.
    pub fn merge(&mut self, update: &TrackedProperties) {
        if let Some(deadline) = update.expected_completion {
            self.expected_completion = Some(deadline);
        }
        if let Some(percent) = update.percent_done {
            self.percent_done = Some(percent);
        }
    }
}
