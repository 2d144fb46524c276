//! Outbound network messages.

use triad_messages::{
    GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, ProposalGossip,
    StatusRequest, StatusResponse, SyncRequest, SyncResponse, TimeoutCertificateGossip,
    TimeoutVoteGossip, VoteGossip,
};

/// Messages a validator can send. The runner performs the actual I/O.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    // ═══════════════════════════════════════════════════════════════════════
    // BFT core
    // ═══════════════════════════════════════════════════════════════════════
    /// Leader proposal.
    Proposal(ProposalGossip),

    /// Vote on a vertex.
    Vote(VoteGossip),

    /// Timeout vote for a stalled view.
    TimeoutVote(TimeoutVoteGossip),

    /// Assembled timeout certificate.
    TimeoutCertificate(TimeoutCertificateGossip),

    // ═══════════════════════════════════════════════════════════════════════
    // Vertex sync
    // ═══════════════════════════════════════════════════════════════════════
    /// Request for missing ancestor vertices.
    VertexRequest(GetVerticesRequest),

    /// Vertex chain response.
    VertexResponse(GetVerticesResponse),

    /// Negative vertex response.
    VertexErrorResponse(GetVerticesErrorResponse),

    // ═══════════════════════════════════════════════════════════════════════
    // Ledger sync
    // ═══════════════════════════════════════════════════════════════════════
    /// Probe for peers' latest ledger proofs.
    StatusRequest(StatusRequest),

    /// Our latest ledger proof.
    StatusResponse(StatusResponse),

    /// Request for committed transactions after a version.
    SyncRequest(SyncRequest),

    /// Committed batch plus proof.
    SyncResponse(SyncResponse),
}

impl OutboundMessage {
    /// The message type name, for logs and stats.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Proposal(_) => "Proposal",
            OutboundMessage::Vote(_) => "Vote",
            OutboundMessage::TimeoutVote(_) => "TimeoutVote",
            OutboundMessage::TimeoutCertificate(_) => "TimeoutCertificate",
            OutboundMessage::VertexRequest(_) => "VertexRequest",
            OutboundMessage::VertexResponse(_) => "VertexResponse",
            OutboundMessage::VertexErrorResponse(_) => "VertexErrorResponse",
            OutboundMessage::StatusRequest(_) => "StatusRequest",
            OutboundMessage::StatusResponse(_) => "StatusResponse",
            OutboundMessage::SyncRequest(_) => "SyncRequest",
            OutboundMessage::SyncResponse(_) => "SyncResponse",
        }
    }

    /// Whether this is a BFT consensus message.
    pub fn is_bft(&self) -> bool {
        matches!(
            self,
            OutboundMessage::Proposal(_)
                | OutboundMessage::Vote(_)
                | OutboundMessage::TimeoutVote(_)
                | OutboundMessage::TimeoutCertificate(_)
        )
    }

    /// Whether this belongs to one of the sync protocols.
    pub fn is_sync(&self) -> bool {
        !self.is_bft()
    }
}
