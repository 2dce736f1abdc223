//! Optimistic-concurrency expectations for stream appends.

use serde::{Deserialize, Serialize};

/// Expected tail version of a stream at append time.
///
/// The store compares the expectation against the current tail and refuses
/// the append on mismatch; this is the first-class optimistic-locking
/// capability of the store interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// The stream must not exist yet (tail version 0).
    NoStream,
    /// The stream tail must be exactly this version.
    Exact(u64),
    /// No expectation; append unconditionally after the current tail.
    Any,
}

impl ExpectedVersion {
    pub fn matches(&self, current: u64) -> bool {
        match self {
            ExpectedVersion::NoStream => current == 0,
            ExpectedVersion::Exact(v) => *v == current,
            ExpectedVersion::Any => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_stream_matches_only_empty() {
        assert!(ExpectedVersion::NoStream.matches(0));
        assert!(!ExpectedVersion::NoStream.matches(1));
    }

    #[test]
    fn exact_matches_exactly() {
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(2));
        assert!(!ExpectedVersion::Exact(3).matches(4));
    }

    #[test]
    fn any_always_matches() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(17));
    }
}
