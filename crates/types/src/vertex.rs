//! Vertices: chained proposals carrying transaction batches.

use crate::{
    EpochId, Hash, LedgerHeader, QuorumCertificate, StateVersion, ValidatorId, ValidatorSet,
    VertexInfo, View,
};

/// An opaque transaction supplied by the mempool. Execution semantics live
/// in the state computer; consensus only orders payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Raw transaction payload.
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Build a transaction from payload bytes.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Content hash of the payload.
    pub fn hash(&self) -> Hash {
        Hash::from_parts(&[b"transaction:", &self.payload])
    }
}

/// A proposal in the chain: a view, a certificate for its parent, and an
/// ordered transaction batch. Immutable once created; identified by its
/// content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    /// Epoch this vertex belongs to.
    pub epoch: EpochId,
    /// View this vertex was proposed in.
    pub view: View,
    /// Certificate for the parent vertex. Chains vertices together.
    pub parent_qc: QuorumCertificate,
    /// Ordered transaction batch.
    pub transactions: Vec<Transaction>,
    /// The proposing validator.
    pub proposer: ValidatorId,
    /// Proposer's clock at proposal time, in milliseconds.
    pub timestamp_ms: u64,
}

impl Vertex {
    /// Content hash. Covers the parent linkage through the parent QC's vote
    /// data (not its signatures), so equivalent certificates with different
    /// signer subsets do not fork the vertex identity.
    pub fn hash(&self) -> Hash {
        let parent = self.parent_qc.vote_data.content_hash();
        let mut tx_hashes = Vec::with_capacity(self.transactions.len() * Hash::BYTES);
        for tx in &self.transactions {
            tx_hashes.extend_from_slice(tx.hash().as_bytes());
        }
        Hash::from_parts(&[
            b"vertex:",
            &self.epoch.0.to_le_bytes(),
            &self.view.0.to_le_bytes(),
            parent.as_bytes(),
            &tx_hashes,
            &self.proposer.0.to_le_bytes(),
            &self.timestamp_ms.to_le_bytes(),
        ])
    }

    /// View of the parent vertex.
    pub fn parent_view(&self) -> View {
        self.parent_qc.view()
    }

    /// Hash of the parent vertex.
    pub fn parent_hash(&self) -> Hash {
        self.parent_qc.vertex_hash()
    }

    /// Whether this is an epoch's anchor vertex (view 0, empty payload).
    pub fn is_anchor(&self) -> bool {
        self.view == View::GENESIS
    }

    /// The anchor vertex of an epoch. Its parent QC is a synthetic
    /// self-certificate over the pre-anchor ledger state.
    pub fn anchor(epoch: EpochId, base_version: StateVersion, base_accumulator: Hash) -> Self {
        let pre = VertexInfo {
            epoch,
            view: View::GENESIS,
            vertex_hash: Hash::ZERO,
            version: base_version,
            accumulator: base_accumulator,
            timestamp_ms: 0,
        };
        Self {
            epoch,
            view: View::GENESIS,
            parent_qc: QuorumCertificate::genesis_for(pre, None),
            transactions: Vec::new(),
            proposer: ValidatorId(0),
            timestamp_ms: 0,
        }
    }
}

/// A vertex plus the result of speculatively executing it on top of its
/// parent: the ledger state reached and any epoch change it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedVertex {
    /// The underlying vertex.
    pub vertex: Vertex,
    /// Post-execution summary (version, accumulator).
    pub info: VertexInfo,
    /// Validator set for the next epoch, when execution decides the epoch
    /// ends at this vertex.
    pub next_validator_set: Option<ValidatorSet>,
}

impl ExecutedVertex {
    /// The executed anchor vertex of an epoch, carrying over the ledger
    /// state from the previous epoch (zero for genesis).
    pub fn anchor(epoch: EpochId, base_version: StateVersion, base_accumulator: Hash) -> Self {
        let vertex = Vertex::anchor(epoch, base_version, base_accumulator);
        let info = VertexInfo {
            epoch,
            view: View::GENESIS,
            vertex_hash: vertex.hash(),
            version: base_version,
            accumulator: base_accumulator,
            timestamp_ms: 0,
        };
        Self {
            vertex,
            info,
            next_validator_set: None,
        }
    }

    /// Content hash of the underlying vertex.
    pub fn hash(&self) -> Hash {
        self.info.vertex_hash
    }

    /// View of the underlying vertex.
    pub fn view(&self) -> View {
        self.vertex.view
    }

    /// The ledger header committed if this vertex ever commits.
    pub fn ledger_header(&self) -> LedgerHeader {
        LedgerHeader {
            info: self.info.clone(),
            next_validator_set: self.next_validator_set.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_hash_covers_payload() {
        let mut a = Vertex::anchor(EpochId(0), StateVersion(0), Hash::ZERO);
        let b = a.clone();
        assert_eq!(a.hash(), b.hash());

        a.transactions.push(Transaction::new(vec![1, 2, 3]));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_anchor_is_self_consistent() {
        let anchor = ExecutedVertex::anchor(EpochId(2), StateVersion(40), Hash::from_bytes(b"acc"));
        assert!(anchor.vertex.is_anchor());
        assert_eq!(anchor.info.vertex_hash, anchor.vertex.hash());
        assert_eq!(anchor.info.version, StateVersion(40));
        assert_eq!(anchor.info.epoch, EpochId(2));
    }

    #[test]
    fn test_anchor_differs_per_epoch() {
        let a = Vertex::anchor(EpochId(0), StateVersion(0), Hash::ZERO);
        let b = Vertex::anchor(EpochId(1), StateVersion(0), Hash::ZERO);
        assert_ne!(a.hash(), b.hash());
    }
}
