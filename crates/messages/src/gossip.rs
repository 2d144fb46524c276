//! Gossiped BFT core messages.

use triad_types::{
    EpochId, QuorumCertificate, TimeoutCertificate, TimeoutVote, Vertex, View, Vote,
};

/// A leader's proposal for the current view.
///
/// The vertex's embedded parent QC justifies proposing at
/// `parent view + 1`; when the view was reached by timeout instead, the
/// proposal must carry the timeout certificate that advanced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// The proposed vertex.
    pub vertex: Vertex,
    /// Proof that the proposal's view is active, required whenever
    /// `vertex.view > vertex.parent_view() + 1`.
    pub timeout_certificate: Option<TimeoutCertificate>,
}

impl Proposal {
    /// A proposal extending the given QC directly (no intervening timeout).
    pub fn new(vertex: Vertex) -> Self {
        Self {
            vertex,
            timeout_certificate: None,
        }
    }

    /// A proposal for a view reached via a timeout certificate.
    pub fn with_timeout_certificate(vertex: Vertex, tc: TimeoutCertificate) -> Self {
        Self {
            vertex,
            timeout_certificate: Some(tc),
        }
    }

    /// Epoch of the proposed vertex.
    pub fn epoch(&self) -> EpochId {
        self.vertex.epoch
    }

    /// View of the proposed vertex.
    pub fn view(&self) -> View {
        self.vertex.view
    }

    /// The QC the proposal builds on.
    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.vertex.parent_qc
    }
}

/// Proposal broadcast wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalGossip {
    /// The proposal.
    pub proposal: Proposal,
}

/// Vote broadcast wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteGossip {
    /// The vote.
    pub vote: Vote,
}

/// Timeout-vote broadcast wrapper.
///
/// `nonce` distinguishes rebroadcasts of the same vote so gossip layers that
/// deduplicate by content still deliver retries after message loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutVoteGossip {
    /// The timeout vote.
    pub vote: TimeoutVote,
    /// Rebroadcast counter.
    pub nonce: u64,
}

impl TimeoutVoteGossip {
    /// First broadcast of a vote.
    pub fn new(vote: TimeoutVote) -> Self {
        Self { vote, nonce: 0 }
    }

    /// A rebroadcast with an explicit nonce.
    pub fn with_nonce(vote: TimeoutVote, nonce: u64) -> Self {
        Self { vote, nonce }
    }
}

/// Timeout-certificate broadcast wrapper, sent by whoever first assembles
/// the quorum so laggards advance without collecting every vote themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutCertificateGossip {
    /// The assembled certificate.
    pub certificate: TimeoutCertificate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use triad_types::{Hash, StateVersion};

    #[test]
    fn test_proposal_accessors() {
        let vertex = Vertex::anchor(EpochId(1), StateVersion(0), Hash::ZERO);
        let proposal = Proposal::new(vertex.clone());
        assert_eq!(proposal.epoch(), EpochId(1));
        assert_eq!(proposal.view(), View(0));
        assert_eq!(proposal.high_qc(), &vertex.parent_qc);
        assert!(proposal.timeout_certificate.is_none());
    }
}
