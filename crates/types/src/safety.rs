//! Persistent safety record.

use crate::{EpochId, View, Vote};

/// The per-validator record that must be durable before any vote leaves the
/// node.
///
/// Invariants maintained by the safety rules:
/// - a validator never signs two votes for the same view
///   (`last_voted_view` only moves forward);
/// - a validator never votes for a vertex whose parent view is below
///   `locked_view`;
/// - a timeout is never signed for a view at or below one already signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyState {
    /// Epoch this record applies to. Reset at epoch boundaries.
    pub epoch: EpochId,
    /// Highest view this validator has voted in.
    pub last_voted_view: View,
    /// View of the two-chain head: the grandparent of the newest vertex
    /// voted for. Votes below this lock are refused.
    pub locked_view: View,
    /// Highest view this validator has signed a timeout for.
    pub last_timeout_view: View,
    /// The most recent vote cast, retained for crash recovery.
    pub last_vote: Option<Vote>,
}

impl SafetyState {
    /// Fresh state for an epoch. The anchor vertex occupies view 0, so both
    /// watermarks start there.
    pub fn new(epoch: EpochId) -> Self {
        Self {
            epoch,
            last_voted_view: View::GENESIS,
            locked_view: View::GENESIS,
            last_timeout_view: View::GENESIS,
            last_vote: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state() {
        let state = SafetyState::new(EpochId(3));
        assert_eq!(state.epoch, EpochId(3));
        assert_eq!(state.last_voted_view, View::GENESIS);
        assert!(state.last_vote.is_none());
    }
}
