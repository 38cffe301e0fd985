//! Domain identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker-assigned sequence number of a message.
///
/// The broker allocates these; this process never generates one. The number
/// is the stable handle used to re-acquire a deferred message, and it stays
/// valid for the whole lifetime of the message.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for SequenceNumber {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        let seq = SequenceNumber::new(42);
        assert_eq!(seq.to_string(), "seq-42");
    }

    #[test]
    fn sequence_numbers_sort_by_assignment_order() {
        let a = SequenceNumber::new(1);
        let b = SequenceNumber::new(2);
        let c = SequenceNumber::new(3);

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn serde_roundtrip() {
        let seq = SequenceNumber::new(7);
        let json = serde_json::to_string(&seq).unwrap();
        let back: SequenceNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(seq, back);
    }
}
