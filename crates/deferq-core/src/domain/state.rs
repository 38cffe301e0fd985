//! Message states and terminal dispositions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a message as the broker reports it.
///
/// Transitions observed by this core:
/// - Active -> Deferred (first deferral at ingestion)
/// - Deferred -> Deferred (progress re-deferral)
/// - Deferred -> gone (completed or dead-lettered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Visible to normal receive.
    Active,

    /// Temporarily skipped; re-acquirable only by sequence number.
    Deferred,
}

impl MessageState {
    pub fn is_deferred(self) -> bool {
        matches!(self, MessageState::Deferred)
    }
}

/// Why a message was moved to the dead-letter channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterReason {
    /// A deferred message carried no expected-completion deadline at all.
    MissingExpectedCompletion,

    /// The deadline passed before the message was completed.
    ExceededExpectedCompletion,
}

impl DeadLetterReason {
    /// The reason string recorded on the dead-lettered message.
    pub fn as_str(self) -> &'static str {
        match self {
            DeadLetterReason::MissingExpectedCompletion => "missing expected completion time",
            DeadLetterReason::ExceededExpectedCompletion => "exceeded expected completion time",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn deferred_predicate() {
        assert!(MessageState::Deferred.is_deferred());
        assert!(!MessageState::Active.is_deferred());
    }

    #[rstest]
    #[case::missing(
        DeadLetterReason::MissingExpectedCompletion,
        "missing expected completion time"
    )]
    #[case::exceeded(
        DeadLetterReason::ExceededExpectedCompletion,
        "exceeded expected completion time"
    )]
    fn reason_strings_are_stable(#[case] reason: DeadLetterReason, #[case] expected: &str) {
        assert_eq!(reason.as_str(), expected);
        assert_eq!(reason.to_string(), expected);
    }
}
