//! Deterministic proposer election.

use std::sync::Arc;
use triad_types::{ValidatorId, ValidatorSet, View};

/// Maps a view to its designated leader. Pure and coordination-free: every
/// honest node computes the same schedule from the public validator set.
pub trait ProposerElection: Send + Sync {
    /// The leader for a view.
    fn leader(&self, view: View) -> ValidatorId;

    /// Whether a validator leads a view.
    fn is_leader(&self, view: View, validator: ValidatorId) -> bool {
        self.leader(view) == validator
    }
}

/// Stake-weighted round robin: each validator owns a contiguous run of
/// slots proportional to its voting power, and views cycle through the
/// slots.
///
/// With equal powers this degenerates to plain round robin; with unequal
/// powers a validator with twice the stake leads twice as often.
pub struct WeightedRoundRobin {
    /// Exclusive cumulative-power upper bound per validator, committee
    /// order.
    cumulative: Vec<(u64, ValidatorId)>,
    total_power: u64,
}

impl WeightedRoundRobin {
    /// Build the schedule for a validator set.
    pub fn new(set: &ValidatorSet) -> Self {
        let mut cumulative = Vec::with_capacity(set.len());
        let mut acc = 0u64;
        for validator in set.iter() {
            acc += validator.voting_power;
            cumulative.push((acc, validator.validator_id));
        }
        Self {
            cumulative,
            total_power: set.total_voting_power(),
        }
    }

    /// Build the schedule as a shared handle.
    pub fn shared(set: &ValidatorSet) -> Arc<dyn ProposerElection> {
        Arc::new(Self::new(set))
    }
}

impl ProposerElection for WeightedRoundRobin {
    fn leader(&self, view: View) -> ValidatorId {
        let slot = view.0 % self.total_power;
        let index = self
            .cumulative
            .partition_point(|&(bound, _)| bound <= slot);
        self.cumulative[index].1
    }
}
