//! Event types for the deterministic state machine.

use triad_messages::Proposal;
use triad_types::{
    Hash, LedgerProof, LedgerUpdate, QuorumCertificate, StateVersion, TimeoutCertificate,
    TimeoutVote, ValidatorId, Vertex, View, Vote,
};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same time are processed in priority order (lower value
/// first), so internal consequences of an event are handled before new
/// external inputs and causality is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Consequences of prior event processing, including delegated-work
    /// callbacks.
    Internal = 0,

    /// Timers scheduled by the node itself.
    Timer = 1,

    /// External inputs from other nodes.
    Network = 2,
}

/// All possible inputs to a validator's state machine.
///
/// Events are **passive data**: they describe something that happened. The
/// state machine processes them and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// The pacemaker's local timeout expired.
    ///
    /// Carries the view the timeout was armed for; a fire for a view the
    /// node has already left is a stale timer and is ignored.
    PacemakerTimeout {
        /// The view the timer was armed in.
        view: View,
    },

    /// Patience window elapsed for an outstanding vertex request.
    VertexRequestTimeout {
        /// The requested vertex hash.
        vertex_hash: Hash,
    },

    /// Periodic ledger-sync health check.
    LedgerSyncTick,

    /// The status-collection window of a ledger sync round closed.
    LedgerSyncStatusDeadline,

    /// Patience window elapsed for an outstanding ledger sync request.
    LedgerSyncRequestTimeout,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages - BFT core (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// A leader's proposal. Sender identity is the signed proposer field.
    ProposalReceived {
        /// The proposal.
        proposal: Proposal,
    },

    /// A vote on a vertex. Sender identity is the signed voter field.
    VoteReceived {
        /// The vote.
        vote: Vote,
    },

    /// A timeout vote. Sender identity is the signed voter field.
    TimeoutVoteReceived {
        /// The timeout vote.
        vote: TimeoutVote,
    },

    /// An assembled timeout certificate gossiped by a peer.
    TimeoutCertificateReceived {
        /// The certificate.
        certificate: TimeoutCertificate,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages - vertex sync (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// A peer asks for a vertex chain from our store.
    VertexRequestReceived {
        /// The requesting peer (reply target).
        from: ValidatorId,
        /// Hash of the newest wanted vertex.
        vertex_hash: Hash,
        /// Maximum chain length to return.
        count: u32,
    },

    /// A peer answered one of our vertex requests.
    VertexResponseReceived {
        /// The responding peer.
        from: ValidatorId,
        /// The vertex chain, newest first.
        vertices: Vec<Vertex>,
    },

    /// A peer could not serve one of our vertex requests.
    VertexErrorResponseReceived {
        /// The responding peer.
        from: ValidatorId,
        /// The hash that could not be served.
        vertex_hash: Hash,
        /// The responder's high QC.
        high_qc: QuorumCertificate,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages - ledger sync (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// A peer asks for our latest ledger proof.
    StatusRequestReceived {
        /// The requesting peer (reply target).
        from: ValidatorId,
    },

    /// A peer reported its latest ledger proof.
    StatusResponseReceived {
        /// The responding peer.
        from: ValidatorId,
        /// The peer's latest proof.
        proof: LedgerProof,
    },

    /// A peer asks for committed transactions after a version.
    SyncRequestReceived {
        /// The requesting peer (reply target).
        from: ValidatorId,
        /// The requester's current version.
        from_version: StateVersion,
    },

    /// A peer answered one of our ledger sync requests.
    SyncResponseReceived {
        /// The responding peer.
        from: ValidatorId,
        /// Committed batch plus proof.
        update: LedgerUpdate,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════════
    /// A quorum certificate was assembled from collected votes.
    QuorumFormed {
        /// The new certificate.
        qc: QuorumCertificate,
    },

    /// A timeout certificate was assembled from collected timeout votes.
    TimeoutQuorumFormed {
        /// The new certificate.
        certificate: TimeoutCertificate,
    },

    /// A vertex committed and its batch was applied to the ledger.
    ///
    /// Routed to the epoch manager (epoch transitions) and the ledger sync
    /// service (local version tracking); external observers get the same
    /// update via `Action::EmitLedgerUpdate`.
    LedgerCommitted {
        /// The committed batch plus proof.
        update: LedgerUpdate,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Async Callbacks (priority: Internal)
    // Results from delegated signature verification
    // ═══════════════════════════════════════════════════════════════════════
    /// Callback from `Action::VerifyVoteSignature`.
    VoteSignatureVerified {
        /// The vote that was checked.
        vote: Vote,
        /// Whether the signature is valid.
        valid: bool,
    },

    /// Callback from `Action::VerifyTimeoutVoteSignature`.
    TimeoutVoteSignatureVerified {
        /// The timeout vote that was checked.
        vote: TimeoutVote,
        /// Whether the signature is valid.
        valid: bool,
    },

    /// Callback from `Action::VerifyQcSignature`.
    QcVerified {
        /// The pending proposal vertex this verification belongs to.
        vertex_hash: Hash,
        /// Whether the aggregated signature is valid.
        valid: bool,
    },
}

impl Event {
    /// The priority for this event type.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::QuorumFormed { .. }
            | Event::TimeoutQuorumFormed { .. }
            | Event::LedgerCommitted { .. }
            | Event::VoteSignatureVerified { .. }
            | Event::TimeoutVoteSignatureVerified { .. }
            | Event::QcVerified { .. } => EventPriority::Internal,

            Event::PacemakerTimeout { .. }
            | Event::VertexRequestTimeout { .. }
            | Event::LedgerSyncTick
            | Event::LedgerSyncStatusDeadline
            | Event::LedgerSyncRequestTimeout => EventPriority::Timer,

            Event::ProposalReceived { .. }
            | Event::VoteReceived { .. }
            | Event::TimeoutVoteReceived { .. }
            | Event::TimeoutCertificateReceived { .. }
            | Event::VertexRequestReceived { .. }
            | Event::VertexResponseReceived { .. }
            | Event::VertexErrorResponseReceived { .. }
            | Event::StatusRequestReceived { .. }
            | Event::StatusResponseReceived { .. }
            | Event::SyncRequestReceived { .. }
            | Event::SyncResponseReceived { .. } => EventPriority::Network,
        }
    }

    /// Whether this event is an internal consequence of prior processing.
    pub fn is_internal(&self) -> bool {
        self.priority() == EventPriority::Internal
    }

    /// The event type name, for logs and stats.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::PacemakerTimeout { .. } => "PacemakerTimeout",
            Event::VertexRequestTimeout { .. } => "VertexRequestTimeout",
            Event::LedgerSyncTick => "LedgerSyncTick",
            Event::LedgerSyncStatusDeadline => "LedgerSyncStatusDeadline",
            Event::LedgerSyncRequestTimeout => "LedgerSyncRequestTimeout",
            Event::ProposalReceived { .. } => "ProposalReceived",
            Event::VoteReceived { .. } => "VoteReceived",
            Event::TimeoutVoteReceived { .. } => "TimeoutVoteReceived",
            Event::TimeoutCertificateReceived { .. } => "TimeoutCertificateReceived",
            Event::VertexRequestReceived { .. } => "VertexRequestReceived",
            Event::VertexResponseReceived { .. } => "VertexResponseReceived",
            Event::VertexErrorResponseReceived { .. } => "VertexErrorResponseReceived",
            Event::StatusRequestReceived { .. } => "StatusRequestReceived",
            Event::StatusResponseReceived { .. } => "StatusResponseReceived",
            Event::SyncRequestReceived { .. } => "SyncRequestReceived",
            Event::SyncResponseReceived { .. } => "SyncResponseReceived",
            Event::QuorumFormed { .. } => "QuorumFormed",
            Event::TimeoutQuorumFormed { .. } => "TimeoutQuorumFormed",
            Event::LedgerCommitted { .. } => "LedgerCommitted",
            Event::VoteSignatureVerified { .. } => "VoteSignatureVerified",
            Event::TimeoutVoteSignatureVerified { .. } => "TimeoutVoteSignatureVerified",
            Event::QcVerified { .. } => "QcVerified",
        }
    }
}
