//! Vote aggregation: collecting verified votes until a quorum certificate
//! can be assembled.

use indexmap::IndexMap;
use tracing::warn;
use triad_types::{
    Hash, QuorumCertificate, Signature, SignerBitfield, ValidatorId, ValidatorSet, View, Vote,
};

/// Why a QC could not be assembled from collected votes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QcBuildError {
    /// Collected power is below the quorum fraction.
    #[error("no quorum yet")]
    NoQuorum,

    /// BLS aggregation of the collected signatures failed.
    #[error("signature aggregation failed")]
    Aggregation,
}

/// Votes collected for a single vertex.
///
/// All votes share identical vote data (they certify the same proposed and
/// parent vertices and the same commitment), so their signatures aggregate.
#[derive(Debug)]
pub struct VoteAggregator {
    votes: IndexMap<ValidatorId, Vote>,
    power: u64,
}

impl VoteAggregator {
    fn new() -> Self {
        Self {
            votes: IndexMap::new(),
            power: 0,
        }
    }

    /// Add a verified vote. Returns false for duplicates.
    fn add(&mut self, vote: Vote, voting_power: u64) -> bool {
        if self.votes.contains_key(&vote.voter) {
            return false;
        }
        self.votes.insert(vote.voter, vote);
        self.power += voting_power;
        true
    }

    /// Power collected so far.
    pub fn voting_power(&self) -> u64 {
        self.power
    }

    /// Assemble a QC once the collected power is a quorum.
    fn build_qc(&self, set: &ValidatorSet) -> Result<QuorumCertificate, QcBuildError> {
        if !set.has_quorum(self.power) {
            return Err(QcBuildError::NoQuorum);
        }
        let mut signers = SignerBitfield::new(set.len());
        let mut signatures = Vec::with_capacity(self.votes.len());
        let mut timestamps: Vec<(u64, u64)> = Vec::with_capacity(self.votes.len());
        for vote in self.votes.values() {
            // Membership was checked before the vote entered the aggregator.
            if let Some(index) = set.index_of(vote.voter) {
                signers.set(index);
            }
            signatures.push(vote.signature.clone());
            let power = set.voting_power(vote.voter).unwrap_or(0);
            timestamps.push((vote.timestamp_ms, power));
        }
        let aggregated_signature =
            Signature::aggregate(&signatures).map_err(|_| QcBuildError::Aggregation)?;

        let first = self
            .votes
            .values()
            .next()
            .ok_or(QcBuildError::NoQuorum)?;
        Ok(QuorumCertificate {
            vote_data: first.vote_data.clone(),
            aggregated_signature,
            signers,
            weighted_timestamp_ms: weighted_median(timestamps),
        })
    }
}

/// Power-weighted median of vote timestamps. A byzantine minority cannot
/// drag the certified time far in either direction.
fn weighted_median(mut samples: Vec<(u64, u64)>) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    samples.sort_unstable_by_key(|&(ts, _)| ts);
    let total: u64 = samples.iter().map(|&(_, p)| p).sum();
    let mut seen = 0u64;
    for (ts, power) in &samples {
        seen += power;
        if seen * 2 >= total {
            return *ts;
        }
    }
    samples[samples.len() - 1].0
}

/// All vote state for the current view window: per-vertex aggregators plus
/// the record used to spot equivocating voters.
#[derive(Debug)]
pub struct PendingVotes {
    aggregators: IndexMap<Hash, VoteAggregator>,
    /// (view, voter) → vertex voted for. A second vertex at the same key is
    /// equivocation.
    recorded: IndexMap<(View, ValidatorId), Hash>,
}

/// Outcome of inserting a verified vote.
#[derive(Debug, PartialEq, Eq)]
pub enum VoteInsertion {
    /// Vote counted; no quorum yet.
    Added,
    /// Vote counted and completed a quorum.
    QuorumReached(QuorumCertificate),
    /// Duplicate of a vote already counted.
    Duplicate,
    /// The voter already voted for a different vertex in this view.
    /// Byzantine evidence; the vote is not counted.
    Equivocation {
        /// The vertex the voter had already endorsed.
        previous: Hash,
    },
}

impl PendingVotes {
    /// Empty collection.
    pub fn new() -> Self {
        Self {
            aggregators: IndexMap::new(),
            recorded: IndexMap::new(),
        }
    }

    /// Insert a signature-verified vote from a known committee member.
    pub fn insert(&mut self, vote: Vote, set: &ValidatorSet) -> VoteInsertion {
        let vertex_hash = vote.vertex_hash();
        let key = (vote.view(), vote.voter);

        match self.recorded.get(&key) {
            Some(&previous) if previous != vertex_hash => {
                warn!(
                    voter = ?vote.voter,
                    view = vote.view().0,
                    previous = ?previous,
                    conflicting = ?vertex_hash,
                    "EQUIVOCATION: two votes for different vertices in one view"
                );
                return VoteInsertion::Equivocation { previous };
            }
            _ => {}
        }
        self.recorded.insert(key, vertex_hash);

        let power = set.voting_power(vote.voter).unwrap_or(0);
        let aggregator = self
            .aggregators
            .entry(vertex_hash)
            .or_insert_with(VoteAggregator::new);
        if !aggregator.add(vote, power) {
            return VoteInsertion::Duplicate;
        }

        match aggregator.build_qc(set) {
            Ok(qc) => VoteInsertion::QuorumReached(qc),
            Err(QcBuildError::NoQuorum) => VoteInsertion::Added,
            Err(e) => {
                warn!(error = %e, vertex_hash = ?vertex_hash, "Failed to build QC");
                VoteInsertion::Added
            }
        }
    }

    /// Collected power for a vertex, for stats and tests.
    pub fn voting_power(&self, vertex_hash: &Hash) -> u64 {
        self.aggregators
            .get(vertex_hash)
            .map(|a| a.voting_power())
            .unwrap_or(0)
    }

    /// Drop state for views at or below `view` (committed or abandoned).
    pub fn prune_below(&mut self, view: View) {
        self.recorded.retain(|&(v, _), _| v > view);
        // Aggregators are keyed by hash; prune by the views recorded for
        // them having vanished is not reliable, so prune by vote view.
        self.aggregators
            .retain(|_, agg| agg.votes.values().any(|vote| vote.view() > view));
    }
}

impl Default for PendingVotes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triad_types::{
        signing, EpochId, KeyPair, StateVersion, ValidatorInfo, VertexInfo, VoteData,
    };

    fn make_validators(n: usize) -> (Vec<KeyPair>, ValidatorSet) {
        let keys: Vec<KeyPair> = (0..n)
            .map(|i| KeyPair::from_seed(&[i as u8 + 1; 32]))
            .collect();
        let set = ValidatorSet::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| ValidatorInfo {
                    validator_id: ValidatorId(i as u64),
                    public_key: k.public_key(),
                    voting_power: 1,
                })
                .collect(),
        );
        (keys, set)
    }

    fn vote_data_at(view: u64, tag: u8) -> VoteData {
        let info = |v: u64, t: u8| VertexInfo {
            epoch: EpochId(0),
            view: View(v),
            vertex_hash: Hash::from_bytes(&[t, v as u8]),
            version: StateVersion(v),
            accumulator: Hash::ZERO,
            timestamp_ms: 0,
        };
        VoteData {
            proposed: info(view, tag),
            parent: info(view - 1, tag),
            committed: None,
        }
    }

    fn signed_vote(keys: &[KeyPair], voter: usize, data: &VoteData, ts: u64) -> Vote {
        Vote {
            vote_data: data.clone(),
            voter: ValidatorId(voter as u64),
            signature: keys[voter].sign(&signing::vote_message(data)),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_quorum_forms_at_three_of_four() {
        let (keys, set) = make_validators(4);
        let data = vote_data_at(5, 0);
        let mut pending = PendingVotes::new();

        assert_eq!(
            pending.insert(signed_vote(&keys, 0, &data, 10), &set),
            VoteInsertion::Added
        );
        assert_eq!(
            pending.insert(signed_vote(&keys, 1, &data, 20), &set),
            VoteInsertion::Added
        );
        match pending.insert(signed_vote(&keys, 2, &data, 30), &set) {
            VoteInsertion::QuorumReached(qc) => {
                assert_eq!(qc.view(), View(5));
                assert_eq!(qc.signers.count(), 3);
                assert!(qc.check(&set).is_ok());
                // Median of {10, 20, 30}.
                assert_eq!(qc.weighted_timestamp_ms, 20);
            }
            other => panic!("expected quorum, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_votes_not_double_counted() {
        let (keys, set) = make_validators(4);
        let data = vote_data_at(5, 0);
        let mut pending = PendingVotes::new();

        pending.insert(signed_vote(&keys, 0, &data, 0), &set);
        assert_eq!(
            pending.insert(signed_vote(&keys, 0, &data, 0), &set),
            VoteInsertion::Duplicate
        );
        assert_eq!(pending.voting_power(&data.proposed.vertex_hash), 1);
    }

    #[test]
    fn test_equivocation_detected_and_not_counted() {
        let (keys, set) = make_validators(4);
        let a = vote_data_at(5, 0);
        let b = vote_data_at(5, 1);
        let mut pending = PendingVotes::new();

        pending.insert(signed_vote(&keys, 0, &a, 0), &set);
        assert_eq!(
            pending.insert(signed_vote(&keys, 0, &b, 0), &set),
            VoteInsertion::Equivocation {
                previous: a.proposed.vertex_hash,
            }
        );
        assert_eq!(pending.voting_power(&b.proposed.vertex_hash), 0);
    }

    #[test]
    fn test_prune_below_drops_old_views() {
        let (keys, set) = make_validators(4);
        let old = vote_data_at(3, 0);
        let new = vote_data_at(6, 0);
        let mut pending = PendingVotes::new();
        pending.insert(signed_vote(&keys, 0, &old, 0), &set);
        pending.insert(signed_vote(&keys, 0, &new, 0), &set);

        pending.prune_below(View(4));
        assert_eq!(pending.voting_power(&old.proposed.vertex_hash), 0);
        assert_eq!(pending.voting_power(&new.proposed.vertex_hash), 1);
    }

    #[test]
    fn test_weighted_median_resists_outliers() {
        // Powers 1 each; one absurd timestamp cannot move the median far.
        assert_eq!(weighted_median(vec![(10, 1), (12, 1), (1_000_000, 1)]), 12);
        assert_eq!(weighted_median(vec![]), 0);
    }
}
