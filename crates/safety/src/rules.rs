//! The vote/timeout gatekeeper.

use tracing::{debug, warn};
use triad_types::{
    signing, EpochId, KeyPair, QuorumCertificate, SafetyState, TimeoutVote, ValidatorId, View,
    Vote, VoteData,
};

/// Why a vote or timeout vote was refused.
///
/// Refusals are normal protocol operation (the rules doing their job), not
/// errors in the usual sense; callers log and move on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SafetyError {
    /// The request targets a different epoch than the safety record.
    #[error("epoch {requested} does not match safety state epoch {current}")]
    WrongEpoch {
        /// Epoch of the request.
        requested: EpochId,
        /// Epoch of the record.
        current: EpochId,
    },

    /// A vote for this view (or a later one) was already signed.
    #[error("view {requested} is not above the last voted view {last_voted}")]
    NotAboveLastVote {
        /// View of the request.
        requested: View,
        /// Highest view already voted.
        last_voted: View,
    },

    /// The proposal's parent is below the locked view.
    #[error("parent view {parent} is below the locked view {locked}")]
    ParentBelowLock {
        /// Parent view of the proposal.
        parent: View,
        /// The current lock.
        locked: View,
    },

    /// A timeout for this view (or a later one) was already signed.
    #[error("timeout for view {requested} already signed at view {last_timeout}")]
    TimeoutAlreadySigned {
        /// View of the request.
        requested: View,
        /// Highest view already timed out.
        last_timeout: View,
    },

    /// A timeout cannot be signed for a view below one already voted in.
    #[error("timeout view {requested} is below the last voted view {last_voted}")]
    TimeoutBelowVote {
        /// View of the request.
        requested: View,
        /// Highest view already voted.
        last_voted: View,
    },
}

/// Holds the signing key and the persistent safety record for one
/// validator.
pub struct SafetyRules {
    validator_id: ValidatorId,
    signing_key: KeyPair,
    state: SafetyState,
}

impl SafetyRules {
    /// Build rules around a (possibly recovered) safety record.
    pub fn new(validator_id: ValidatorId, signing_key: KeyPair, state: SafetyState) -> Self {
        Self {
            validator_id,
            signing_key,
            state,
        }
    }

    /// The current record. Callers persist a clone of this alongside every
    /// signed message.
    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    /// Reset the record for a new epoch. The vertex store re-anchors at the
    /// boundary vertex, so view watermarks restart at genesis.
    pub fn start_epoch(&mut self, epoch: EpochId) {
        debug!(validator = ?self.validator_id, %epoch, "Safety rules entering new epoch");
        self.state = SafetyState::new(epoch);
    }

    /// Produce a signed vote for a vertex, or a refusal.
    ///
    /// `grandparent_view` is the view of the proposal's grandparent (the
    /// two-chain head); a successful vote raises the lock to it.
    pub fn construct_vote(
        &mut self,
        vote_data: &VoteData,
        grandparent_view: View,
        now_ms: u64,
    ) -> Result<Vote, SafetyError> {
        let proposed = &vote_data.proposed;
        if proposed.epoch != self.state.epoch {
            return Err(SafetyError::WrongEpoch {
                requested: proposed.epoch,
                current: self.state.epoch,
            });
        }
        // Rule 1: one vote per view, views only move forward.
        if proposed.view <= self.state.last_voted_view {
            return Err(SafetyError::NotAboveLastVote {
                requested: proposed.view,
                last_voted: self.state.last_voted_view,
            });
        }
        // Rule 2: the locking rule. A proposal must build on a parent at or
        // above the lock, otherwise a quorum that already locked a later
        // branch could be double-crossed.
        if vote_data.parent.view < self.state.locked_view {
            warn!(
                validator = ?self.validator_id,
                parent_view = vote_data.parent.view.0,
                locked_view = self.state.locked_view.0,
                "Refusing vote below lock"
            );
            return Err(SafetyError::ParentBelowLock {
                parent: vote_data.parent.view,
                locked: self.state.locked_view,
            });
        }

        let signature = self.signing_key.sign(&signing::vote_message(vote_data));
        let vote = Vote {
            vote_data: vote_data.clone(),
            voter: self.validator_id,
            signature,
            timestamp_ms: now_ms,
        };

        self.state.last_voted_view = proposed.view;
        self.state.locked_view = self.state.locked_view.max(grandparent_view);
        self.state.last_vote = Some(vote.clone());

        debug!(
            validator = ?self.validator_id,
            view = proposed.view.0,
            vertex_hash = ?proposed.vertex_hash,
            locked_view = self.state.locked_view.0,
            "Constructed vote"
        );
        Ok(vote)
    }

    /// Produce a signed timeout vote for a view, or a refusal.
    ///
    /// At most one timeout per view; a signed timeout also raises the vote
    /// watermark so this validator can no longer vote in the abandoned
    /// view.
    pub fn construct_timeout(
        &mut self,
        epoch: EpochId,
        view: View,
        high_qc: QuorumCertificate,
    ) -> Result<TimeoutVote, SafetyError> {
        if epoch != self.state.epoch {
            return Err(SafetyError::WrongEpoch {
                requested: epoch,
                current: self.state.epoch,
            });
        }
        if view <= self.state.last_timeout_view {
            return Err(SafetyError::TimeoutAlreadySigned {
                requested: view,
                last_timeout: self.state.last_timeout_view,
            });
        }
        if view < self.state.last_voted_view {
            return Err(SafetyError::TimeoutBelowVote {
                requested: view,
                last_voted: self.state.last_voted_view,
            });
        }

        let signature = self.signing_key.sign(&signing::timeout_message(epoch, view));
        let vote = TimeoutVote {
            epoch,
            view,
            high_qc,
            voter: self.validator_id,
            signature,
        };

        self.state.last_timeout_view = view;
        self.state.last_voted_view = self.state.last_voted_view.max(view);

        debug!(
            validator = ?self.validator_id,
            view = view.0,
            "Constructed timeout vote"
        );
        Ok(vote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use triad_types::{Hash, StateVersion, VertexInfo};

    fn info(view: u64) -> VertexInfo {
        VertexInfo {
            epoch: EpochId(0),
            view: View(view),
            vertex_hash: Hash::from_bytes(&view.to_le_bytes()),
            version: StateVersion(view),
            accumulator: Hash::ZERO,
            timestamp_ms: 0,
        }
    }

    fn vote_data(view: u64, parent_view: u64) -> VoteData {
        VoteData {
            proposed: info(view),
            parent: info(parent_view),
            committed: None,
        }
    }

    fn make_rules() -> SafetyRules {
        SafetyRules::new(
            ValidatorId(0),
            KeyPair::from_seed(&[1u8; 32]),
            SafetyState::new(EpochId(0)),
        )
    }

    #[traced_test]
    #[test]
    fn test_vote_advances_watermarks() {
        let mut rules = make_rules();
        let vote = rules
            .construct_vote(&vote_data(3, 2), View(1), 100)
            .unwrap();
        assert_eq!(vote.view(), View(3));
        assert_eq!(rules.state().last_voted_view, View(3));
        assert_eq!(rules.state().locked_view, View(1));
        assert_eq!(rules.state().last_vote.as_ref(), Some(&vote));
    }

    #[traced_test]
    #[test]
    fn test_never_two_votes_for_same_view() {
        let mut rules = make_rules();
        rules.construct_vote(&vote_data(3, 2), View(1), 0).unwrap();
        assert_eq!(
            rules.construct_vote(&vote_data(3, 2), View(1), 0),
            Err(SafetyError::NotAboveLastVote {
                requested: View(3),
                last_voted: View(3),
            })
        );
        // Older views refused too.
        assert!(rules.construct_vote(&vote_data(2, 1), View(0), 0).is_err());
    }

    #[traced_test]
    #[test]
    fn test_locking_rule_refuses_stale_branch() {
        let mut rules = make_rules();
        // Voting at view 5 on parent 4 locks view 3.
        rules.construct_vote(&vote_data(5, 4), View(3), 0).unwrap();
        assert_eq!(rules.state().locked_view, View(3));

        // A later proposal building on a parent below the lock is refused.
        assert_eq!(
            rules.construct_vote(&vote_data(6, 2), View(1), 0),
            Err(SafetyError::ParentBelowLock {
                parent: View(2),
                locked: View(3),
            })
        );

        // Building on the locked branch is fine.
        assert!(rules.construct_vote(&vote_data(6, 5), View(4), 0).is_ok());
    }

    #[traced_test]
    #[test]
    fn test_one_timeout_per_view() {
        let mut rules = make_rules();
        let high_qc = QuorumCertificate::genesis_for(info(0), None);
        rules
            .construct_timeout(EpochId(0), View(4), high_qc.clone())
            .unwrap();
        assert_eq!(
            rules.construct_timeout(EpochId(0), View(4), high_qc.clone()),
            Err(SafetyError::TimeoutAlreadySigned {
                requested: View(4),
                last_timeout: View(4),
            })
        );
        // Later views are allowed.
        assert!(rules.construct_timeout(EpochId(0), View(5), high_qc).is_ok());
    }

    #[traced_test]
    #[test]
    fn test_no_vote_after_timeout_in_same_view() {
        let mut rules = make_rules();
        let high_qc = QuorumCertificate::genesis_for(info(0), None);
        rules.construct_timeout(EpochId(0), View(4), high_qc).unwrap();
        // The timeout raised the vote watermark: view 4 can no longer be
        // voted in.
        assert!(rules.construct_vote(&vote_data(4, 3), View(2), 0).is_err());
        assert!(rules.construct_vote(&vote_data(5, 3), View(2), 0).is_ok());
    }

    #[traced_test]
    #[test]
    fn test_epoch_mismatch_refused() {
        let mut rules = make_rules();
        let mut data = vote_data(1, 0);
        data.proposed.epoch = EpochId(1);
        assert_eq!(
            rules.construct_vote(&data, View(0), 0),
            Err(SafetyError::WrongEpoch {
                requested: EpochId(1),
                current: EpochId(0),
            })
        );
    }

    #[traced_test]
    #[test]
    fn test_start_epoch_resets_watermarks() {
        let mut rules = make_rules();
        rules.construct_vote(&vote_data(5, 4), View(3), 0).unwrap();
        rules.start_epoch(EpochId(1));
        assert_eq!(rules.state().epoch, EpochId(1));
        assert_eq!(rules.state().last_voted_view, View::GENESIS);

        let mut data = vote_data(1, 0);
        data.proposed.epoch = EpochId(1);
        data.parent.epoch = EpochId(1);
        assert!(rules.construct_vote(&data, View(0), 0).is_ok());
    }
}
