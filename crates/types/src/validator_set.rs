//! Validator set for an epoch, with stake-weighted quorum arithmetic.

use crate::{Hash, PublicKey, ValidatorId};
use std::collections::HashMap;

/// A validator's membership record: identity, key, and stake weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    /// Committee identity.
    pub validator_id: ValidatorId,
    /// Key used to verify this validator's consensus signatures.
    pub public_key: PublicKey,
    /// Stake weight counted toward quorums.
    pub voting_power: u64,
}

/// The super-majority fraction required for a quorum.
///
/// A quorum holds when `power * denominator > total * numerator`, i.e.
/// strictly more than `numerator/denominator` of total power. The default is
/// the classical BFT > 2/3; deployments may configure a different
/// super-majority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumFraction {
    numerator: u64,
    denominator: u64,
}

impl QuorumFraction {
    /// Build a fraction; `numerator < denominator` must hold.
    pub fn new(numerator: u64, denominator: u64) -> Self {
        assert!(
            numerator < denominator && denominator > 0,
            "quorum fraction must be a proper fraction"
        );
        Self {
            numerator,
            denominator,
        }
    }

    /// Whether `power` is a quorum out of `total`.
    pub fn is_met(&self, power: u64, total: u64) -> bool {
        if total == 0 {
            return false;
        }
        power as u128 * self.denominator as u128 > total as u128 * self.numerator as u128
    }
}

impl Default for QuorumFraction {
    fn default() -> Self {
        Self::new(2, 3)
    }
}

/// Immutable validator membership for one epoch.
///
/// Committee order is the order validators were supplied in; signer
/// bitfields and proposer election both index into that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
    by_id: HashMap<ValidatorId, usize>,
    total_power: u64,
    quorum: QuorumFraction,
}

impl ValidatorSet {
    /// Build a set with the default > 2/3 quorum fraction.
    pub fn new(validators: Vec<ValidatorInfo>) -> Self {
        Self::with_quorum_fraction(validators, QuorumFraction::default())
    }

    /// Build a set with a configured super-majority fraction.
    pub fn with_quorum_fraction(validators: Vec<ValidatorInfo>, quorum: QuorumFraction) -> Self {
        let by_id = validators
            .iter()
            .enumerate()
            .map(|(i, v)| (v.validator_id, i))
            .collect();
        let total_power = validators.iter().map(|v| v.voting_power).sum();
        Self {
            validators,
            by_id,
            total_power,
            quorum,
        }
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Total voting power.
    pub fn total_voting_power(&self) -> u64 {
        self.total_power
    }

    /// The configured quorum fraction.
    pub fn quorum_fraction(&self) -> QuorumFraction {
        self.quorum
    }

    /// Whether `power` constitutes a quorum of this set.
    pub fn has_quorum(&self, power: u64) -> bool {
        self.quorum.is_met(power, self.total_power)
    }

    /// Committee index of a validator, if a member.
    pub fn index_of(&self, id: ValidatorId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    /// Whether a validator is a member.
    pub fn contains(&self, id: ValidatorId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// The validator at a committee index.
    pub fn validator_at(&self, index: usize) -> Option<&ValidatorInfo> {
        self.validators.get(index)
    }

    /// Voting power of a member, if any.
    pub fn voting_power(&self, id: ValidatorId) -> Option<u64> {
        self.by_id.get(&id).map(|&i| self.validators[i].voting_power)
    }

    /// Public key of a member, if any.
    pub fn public_key(&self, id: ValidatorId) -> Option<&PublicKey> {
        self.by_id.get(&id).map(|&i| &self.validators[i].public_key)
    }

    /// Iterate members in committee order.
    pub fn iter(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.validators.iter()
    }

    /// Resolve public keys for the set committee indices of a bitfield, in
    /// committee order. Returns None if any index is out of range.
    pub fn keys_for_indices(
        &self,
        indices: impl Iterator<Item = usize>,
    ) -> Option<Vec<PublicKey>> {
        indices
            .map(|i| self.validators.get(i).map(|v| v.public_key.clone()))
            .collect()
    }

    /// Deterministic content hash of the membership (identity, key, power,
    /// in committee order) plus the quorum fraction.
    pub fn content_hash(&self) -> Hash {
        let mut parts: Vec<Vec<u8>> = vec![b"validator_set:".to_vec()];
        parts.push(self.quorum.numerator.to_le_bytes().to_vec());
        parts.push(self.quorum.denominator.to_le_bytes().to_vec());
        for v in &self.validators {
            parts.push(v.validator_id.0.to_le_bytes().to_vec());
            parts.push(v.public_key.as_bytes().to_vec());
            parts.push(v.voting_power.to_le_bytes().to_vec());
        }
        let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        Hash::from_parts(&refs)
    }
}
