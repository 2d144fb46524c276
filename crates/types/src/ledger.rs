//! Ledger commitment types: executed-vertex summaries, committed headers,
//! and the proofs that drive ledger-level sync.

use crate::{
    EpochId, Hash, QuorumCertificate, StateVersion, Transaction, ValidatorSet, View,
};

/// Summary of an executed vertex: its chain position plus the ledger state
/// reached by executing it.
///
/// This is what votes certify and what ledger headers commit to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexInfo {
    /// Epoch the vertex belongs to.
    pub epoch: EpochId,
    /// View the vertex was proposed in.
    pub view: View,
    /// Content hash of the vertex.
    pub vertex_hash: Hash,
    /// Ledger version after executing the vertex's transactions.
    pub version: StateVersion,
    /// Transaction accumulator hash after execution.
    pub accumulator: Hash,
    /// Proposal timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl VertexInfo {
    /// Deterministic field encoding, used in signing messages and hashes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);
        out.extend_from_slice(&self.epoch.0.to_le_bytes());
        out.extend_from_slice(&self.view.0.to_le_bytes());
        out.extend_from_slice(self.vertex_hash.as_bytes());
        out.extend_from_slice(&self.version.0.to_le_bytes());
        out.extend_from_slice(self.accumulator.as_bytes());
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        out
    }
}

/// Commitment to the cumulative transaction log at a committed vertex.
///
/// Carried inside votes (and therefore QCs) when the voted vertex completes
/// a three-chain; the header plus the certifying QC form a [`LedgerProof`].
/// A header whose `next_validator_set` is populated marks an epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHeader {
    /// The committed vertex and the ledger state it produced.
    pub info: VertexInfo,
    /// Validator set for the next epoch, when this commit ends the epoch.
    pub next_validator_set: Option<ValidatorSet>,
}

impl LedgerHeader {
    /// Deterministic content hash.
    pub fn content_hash(&self) -> Hash {
        let info = self.info.encode();
        let next = self
            .next_validator_set
            .as_ref()
            .map(|set| set.content_hash())
            .unwrap_or(Hash::ZERO);
        Hash::from_parts(&[b"ledger_header:", &info, next.as_bytes()])
    }

    /// Whether this header ends its epoch.
    pub fn is_epoch_boundary(&self) -> bool {
        self.next_validator_set.is_some()
    }
}

/// Proof that a ledger header was committed: the header plus the quorum
/// certificate whose vote data carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerProof {
    header: LedgerHeader,
    qc: QuorumCertificate,
}

impl LedgerProof {
    /// Extract a proof from a QC that carries a commitment. Returns None for
    /// QCs that do not commit anything.
    pub fn from_qc(qc: &QuorumCertificate) -> Option<Self> {
        qc.committed().map(|header| Self {
            header: header.clone(),
            qc: qc.clone(),
        })
    }

    /// A proof for an epoch's anchor (genesis or boundary) vertex, backed by
    /// the anchor's genesis certificate. Trusted by construction, not by
    /// signatures.
    pub fn anchor(header: LedgerHeader) -> Self {
        let qc = QuorumCertificate::genesis_for(header.info.clone(), Some(header.clone()));
        Self { header, qc }
    }

    /// The committed header.
    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    /// The certifying QC.
    pub fn qc(&self) -> &QuorumCertificate {
        &self.qc
    }

    /// Committed ledger version.
    pub fn version(&self) -> StateVersion {
        self.header.info.version
    }

    /// Epoch of the committed vertex.
    pub fn epoch(&self) -> EpochId {
        self.header.info.epoch
    }

    /// Structural + cryptographic validation against a validator set:
    /// the QC must be a valid quorum and its commitment must be this
    /// header. Genesis-backed anchors are rejected (they prove nothing).
    pub fn verify(&self, set: &ValidatorSet) -> Result<(), crate::CertificateError> {
        self.qc.check(set)?;
        if self.qc.committed() != Some(&self.header) {
            return Err(crate::CertificateError::CommitMismatch);
        }
        Ok(())
    }
}

/// An ordered run of committed transactions covering versions
/// `(first_version - len, first_version]`... i.e. ending at `proof.version()`
/// when packaged in a [`LedgerUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommittedBatch {
    /// Transactions in commit order.
    pub transactions: Vec<Transaction>,
}

impl CommittedBatch {
    /// Number of transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// A committed batch plus the proof that committed it.
///
/// Published after every commit; consumed by the mempool, the ledger sync
/// service, and any other observer. Consecutive updates observed by any
/// component strictly increase `proof.version()` with no gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerUpdate {
    /// Transactions committed by this update, in order.
    pub batch: CommittedBatch,
    /// Proof of the commit.
    pub proof: LedgerProof,
}

impl LedgerUpdate {
    /// The ledger version after applying this update.
    pub fn version(&self) -> StateVersion {
        self.proof.version()
    }

    /// Validator set for the next epoch, when this update crosses an epoch
    /// boundary.
    pub fn next_validator_set(&self) -> Option<&ValidatorSet> {
        self.proof.header().next_validator_set.as_ref()
    }
}
