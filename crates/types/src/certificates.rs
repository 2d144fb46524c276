//! Votes, timeout votes, and the aggregate certificates built from them.

use crate::{
    signing, EpochId, Hash, LedgerHeader, Signature, SignerBitfield, ValidatorId, ValidatorSet,
    VertexInfo, View,
};

/// The content a consensus vote certifies: the proposed vertex, its parent,
/// and (when the vote completes a three-chain) the vertex that commits.
///
/// The `committed` header is derived deterministically from the vertex
/// store's chain, so all honest voters for the same vertex produce identical
/// vote data and their signatures aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteData {
    /// The vertex being voted on.
    pub proposed: VertexInfo,
    /// The vertex certified by the proposal's parent QC.
    pub parent: VertexInfo,
    /// The ledger header that commits if this vote's vertex is certified,
    /// present exactly when the proposed vertex completes a contiguous
    /// three-chain.
    pub committed: Option<LedgerHeader>,
}

impl VoteData {
    /// Deterministic content hash over all fields.
    pub fn content_hash(&self) -> Hash {
        let proposed = self.proposed.encode();
        let parent = self.parent.encode();
        let committed = self
            .committed
            .as_ref()
            .map(|h| h.content_hash())
            .unwrap_or(Hash::ZERO);
        Hash::from_parts(&[b"vote_data:", &proposed, &parent, committed.as_bytes()])
    }
}

/// A single validator's signed vote for a vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// What is being certified.
    pub vote_data: VoteData,
    /// The voting validator.
    pub voter: ValidatorId,
    /// BLS signature over the domain-tagged vote data.
    pub signature: Signature,
    /// Voter's local clock at signing, in milliseconds. Aggregated into the
    /// QC's weighted timestamp.
    pub timestamp_ms: u64,
}

impl Vote {
    /// Epoch of the voted vertex.
    pub fn epoch(&self) -> EpochId {
        self.vote_data.proposed.epoch
    }

    /// View of the voted vertex.
    pub fn view(&self) -> View {
        self.vote_data.proposed.view
    }

    /// Hash of the voted vertex.
    pub fn vertex_hash(&self) -> Hash {
        self.vote_data.proposed.vertex_hash
    }
}

/// A single validator's signed declaration that a view timed out.
///
/// Carries the sender's highest known QC (attached unsigned, so that the
/// view-scoped signatures still aggregate) which lets the next leader build
/// on the freshest certified vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutVote {
    /// Epoch the timeout belongs to.
    pub epoch: EpochId,
    /// The view being given up on.
    pub view: View,
    /// The sender's highest known QC.
    pub high_qc: QuorumCertificate,
    /// The timing-out validator.
    pub voter: ValidatorId,
    /// BLS signature over the domain-tagged (epoch, view).
    pub signature: Signature,
}

/// Proof that a quorum of validators voted for one vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumCertificate {
    /// The vote data every signer certified.
    pub vote_data: VoteData,
    /// Aggregated BLS signature of the signers.
    pub aggregated_signature: Signature,
    /// Which committee members signed.
    pub signers: SignerBitfield,
    /// Voting-power-weighted median of the vote timestamps. Inherited by
    /// leader-timeout proposals so a byzantine leader cannot steer time.
    pub weighted_timestamp_ms: u64,
}

impl QuorumCertificate {
    /// The self-certifying certificate anchoring an epoch's root vertex
    /// (genesis, or the re-anchored epoch-boundary vertex). Carries no
    /// signatures; accepted only where it certifies the local root.
    pub fn genesis_for(root: VertexInfo, committed: Option<LedgerHeader>) -> Self {
        Self {
            vote_data: VoteData {
                proposed: root.clone(),
                parent: root,
                committed,
            },
            aggregated_signature: Signature::empty(),
            signers: SignerBitfield::empty(),
            weighted_timestamp_ms: 0,
        }
    }

    /// Whether this is a signature-less anchor certificate.
    pub fn is_genesis(&self) -> bool {
        self.aggregated_signature.is_empty()
    }

    /// Epoch of the certified vertex.
    pub fn epoch(&self) -> EpochId {
        self.vote_data.proposed.epoch
    }

    /// View of the certified vertex.
    pub fn view(&self) -> View {
        self.vote_data.proposed.view
    }

    /// Hash of the certified vertex.
    pub fn vertex_hash(&self) -> Hash {
        self.vote_data.proposed.vertex_hash
    }

    /// View of the certified vertex's parent.
    pub fn parent_view(&self) -> View {
        self.vote_data.parent.view
    }

    /// Hash of the certified vertex's parent.
    pub fn parent_hash(&self) -> Hash {
        self.vote_data.parent.vertex_hash
    }

    /// The ledger header this certificate commits, if its three-chain
    /// completed.
    pub fn committed(&self) -> Option<&LedgerHeader> {
        self.vote_data.committed.as_ref()
    }

    /// Structural validation only: recompute the signers' power from the
    /// bitfield and check the quorum fraction, without touching the
    /// signature. Used at message boundaries before the expensive check is
    /// delegated.
    pub fn verify_quorum(&self, set: &ValidatorSet) -> Result<(), CertificateError> {
        if self.is_genesis() {
            return Err(CertificateError::GenesisNotVerifiable);
        }
        let power = signer_power(&self.signers, set)?;
        if !set.has_quorum(power) {
            return Err(CertificateError::NoQuorum {
                power,
                total: set.total_voting_power(),
            });
        }
        Ok(())
    }

    /// Validate this certificate against a validator set: recompute the
    /// signers' power from the bitfield, check the quorum fraction, and
    /// verify the aggregated signature over the vote message.
    ///
    /// Genesis anchors carry no signatures and always fail here; callers
    /// accept them only by root identity.
    pub fn check(&self, set: &ValidatorSet) -> Result<(), CertificateError> {
        self.verify_quorum(set)?;
        let keys = set
            .keys_for_indices(self.signers.set_indices())
            .ok_or(CertificateError::UnknownSigner)?;
        let aggregate =
            crate::PublicKey::aggregate(&keys).map_err(|_| CertificateError::BadAggregate)?;
        let message = signing::vote_message(&self.vote_data);
        if !aggregate.verify(&message, &self.aggregated_signature) {
            return Err(CertificateError::BadSignature);
        }
        Ok(())
    }
}

/// Proof that a quorum of validators independently timed out a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutCertificate {
    /// Epoch of the timed-out view.
    pub epoch: EpochId,
    /// The timed-out view.
    pub view: View,
    /// The highest QC among the contributing timeout votes.
    pub high_qc: QuorumCertificate,
    /// Aggregated BLS signature of the signers.
    pub aggregated_signature: Signature,
    /// Which committee members signed.
    pub signers: SignerBitfield,
}

impl TimeoutCertificate {
    /// Validate against a validator set: quorum arithmetic from the bitfield
    /// plus the aggregated signature over the timeout message. The embedded
    /// `high_qc` is validated separately by whoever uses it.
    pub fn check(&self, set: &ValidatorSet) -> Result<(), CertificateError> {
        let power = signer_power(&self.signers, set)?;
        if !set.has_quorum(power) {
            return Err(CertificateError::NoQuorum {
                power,
                total: set.total_voting_power(),
            });
        }
        let keys = set
            .keys_for_indices(self.signers.set_indices())
            .ok_or(CertificateError::UnknownSigner)?;
        let aggregate =
            crate::PublicKey::aggregate(&keys).map_err(|_| CertificateError::BadAggregate)?;
        let message = signing::timeout_message(self.epoch, self.view);
        if !aggregate.verify(&message, &self.aggregated_signature) {
            return Err(CertificateError::BadSignature);
        }
        Ok(())
    }
}

/// Sum the voting power of a bitfield's signers.
fn signer_power(signers: &SignerBitfield, set: &ValidatorSet) -> Result<u64, CertificateError> {
    let mut power = 0u64;
    for index in signers.set_indices() {
        let validator = set
            .validator_at(index)
            .ok_or(CertificateError::UnknownSigner)?;
        power += validator.voting_power;
    }
    if power == 0 {
        return Err(CertificateError::NoSigners);
    }
    Ok(power)
}

/// Certificate validation failures. All are peer protocol violations at the
/// message boundary: logged as evidence and the message discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    /// Bitfield empty or zero power.
    #[error("certificate has no signers")]
    NoSigners,

    /// Bitfield index beyond the committee.
    #[error("certificate signer index outside the committee")]
    UnknownSigner,

    /// Signer power below the quorum fraction.
    #[error("certificate power {power} is not a quorum of {total}")]
    NoQuorum {
        /// Power represented by the signers.
        power: u64,
        /// Total power of the validator set.
        total: u64,
    },

    /// Public key aggregation failed.
    #[error("signer keys failed to aggregate")]
    BadAggregate,

    /// Aggregated signature did not verify.
    #[error("aggregated signature verification failed")]
    BadSignature,

    /// Genesis anchors cannot be verified by signatures.
    #[error("genesis certificate carries no signatures")]
    GenesisNotVerifiable,

    /// A ledger proof's header does not match its QC's commitment.
    #[error("proof header does not match the certificate's commitment")]
    CommitMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyPair, StateVersion, ValidatorInfo};

    fn make_validators(n: usize) -> (Vec<KeyPair>, ValidatorSet) {
        let keys: Vec<KeyPair> = (0..n).map(|i| KeyPair::from_seed(&[i as u8 + 1; 32])).collect();
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

    fn make_vote_data(view: u64) -> VoteData {
        let info = |v: u64| VertexInfo {
            epoch: EpochId(0),
            view: View(v),
            vertex_hash: Hash::from_bytes(&v.to_le_bytes()),
            version: StateVersion(v),
            accumulator: Hash::ZERO,
            timestamp_ms: 0,
        };
        VoteData {
            proposed: info(view),
            parent: info(view - 1),
            committed: None,
        }
    }

    fn build_qc(vote_data: VoteData, keys: &[KeyPair], signer_indices: &[usize]) -> QuorumCertificate {
        let message = signing::vote_message(&vote_data);
        let sigs: Vec<Signature> = signer_indices.iter().map(|&i| keys[i].sign(&message)).collect();
        let mut signers = SignerBitfield::new(keys.len());
        for &i in signer_indices {
            signers.set(i);
        }
        QuorumCertificate {
            vote_data,
            aggregated_signature: Signature::aggregate(&sigs).unwrap(),
            signers,
            weighted_timestamp_ms: 0,
        }
    }

    #[test]
    fn test_qc_check_passes_with_quorum() {
        let (keys, set) = make_validators(4);
        let qc = build_qc(make_vote_data(3), &keys, &[0, 1, 2]);
        assert!(qc.check(&set).is_ok());
    }

    #[test]
    fn test_qc_check_rejects_subquorum() {
        let (keys, set) = make_validators(4);
        let qc = build_qc(make_vote_data(3), &keys, &[0, 1]);
        assert!(matches!(
            qc.check(&set),
            Err(CertificateError::NoQuorum { power: 2, total: 4 })
        ));
    }

    #[test]
    fn test_qc_check_rejects_tampered_vote_data() {
        let (keys, set) = make_validators(4);
        let mut qc = build_qc(make_vote_data(3), &keys, &[0, 1, 2]);
        qc.vote_data.proposed.vertex_hash = Hash::from_bytes(b"forged");
        assert_eq!(qc.check(&set), Err(CertificateError::BadSignature));
    }

    #[test]
    fn test_genesis_qc_not_signature_verifiable() {
        let (_, set) = make_validators(4);
        let qc = QuorumCertificate::genesis_for(make_vote_data(1).proposed, None);
        assert!(qc.is_genesis());
        assert_eq!(qc.check(&set), Err(CertificateError::GenesisNotVerifiable));
    }

    #[test]
    fn test_tc_check() {
        let (keys, set) = make_validators(4);
        let message = signing::timeout_message(EpochId(0), View(5));
        let sigs: Vec<Signature> = keys[..3].iter().map(|k| k.sign(&message)).collect();
        let mut signers = SignerBitfield::new(4);
        (0..3).for_each(|i| signers.set(i));

        let tc = TimeoutCertificate {
            epoch: EpochId(0),
            view: View(5),
            high_qc: QuorumCertificate::genesis_for(make_vote_data(1).proposed, None),
            aggregated_signature: Signature::aggregate(&sigs).unwrap(),
            signers,
        };
        assert!(tc.check(&set).is_ok());

        let mut wrong_view = tc.clone();
        wrong_view.view = View(6);
        assert_eq!(wrong_view.check(&set), Err(CertificateError::BadSignature));
    }
}
