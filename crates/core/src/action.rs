//! Action types for the deterministic state machine.

use crate::{Event, OutboundMessage, TimerId};
use std::time::Duration;
use triad_types::{
    Hash, LedgerUpdate, PublicKey, QuorumCertificate, SafetyState, TimeoutVote, ValidatorId, Vote,
};

/// Commands the state machine wants performed.
///
/// The runner executes actions and feeds results of delegated work back in
/// as callback events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Broadcast a message to every validator in the epoch.
    Broadcast {
        /// The message.
        message: OutboundMessage,
    },

    /// Send a message to one validator (sync request/response traffic).
    SendTo {
        /// The destination.
        peer: ValidatorId,
        /// The message.
        message: OutboundMessage,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Arm a timer. Re-arming an id supersedes the previous schedule.
    SetTimer {
        /// Timer identity.
        id: TimerId,
        /// Delay until the fire event.
        duration: Duration,
    },

    /// Cancel a previously armed timer. Cancellation is best-effort: state
    /// machines additionally ignore stale fires.
    CancelTimer {
        /// Timer identity.
        id: TimerId,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal (fed back as events with Internal priority)
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for processing ahead of external inputs at
    /// the same timestamp.
    EnqueueInternal {
        /// The event.
        event: Event,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Delegated Work (async, returns a callback event)
    // ═══════════════════════════════════════════════════════════════════════
    /// Verify a vote signature. Worker pool in production, inline in
    /// simulation. Returns `Event::VoteSignatureVerified`.
    VerifyVoteSignature {
        /// The vote to check.
        vote: Vote,
        /// The voter's public key (pre-resolved by the state machine).
        public_key: PublicKey,
        /// The domain-tagged message that was signed.
        signing_message: Vec<u8>,
    },

    /// Verify a timeout-vote signature. Returns
    /// `Event::TimeoutVoteSignatureVerified`.
    VerifyTimeoutVoteSignature {
        /// The timeout vote to check.
        vote: TimeoutVote,
        /// The voter's public key.
        public_key: PublicKey,
        /// The domain-tagged message that was signed.
        signing_message: Vec<u8>,
    },

    /// Verify a QC's aggregated signature before voting on the proposal
    /// that carried it. Without this a byzantine proposer could smuggle a
    /// fake QC under a valid-looking proposal. Returns `Event::QcVerified`
    /// correlated by the proposal's vertex hash.
    VerifyQcSignature {
        /// The certificate to check.
        qc: QuorumCertificate,
        /// Signer public keys in bitfield order.
        public_keys: Vec<PublicKey>,
        /// The pending proposal vertex (correlation key for the callback).
        vertex_hash: Hash,
        /// The domain-tagged message the signers signed.
        signing_message: Vec<u8>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════════════════
    /// Persist the safety record.
    ///
    /// **Safety critical**: when this action precedes a broadcast in the
    /// same action batch, the runner MUST complete the persist before
    /// sending. A node that crashes after sending but before persisting
    /// could equivocate after restart. If the persist fails the runner must
    /// drop the remainder of the batch: no vote leaves the node without a
    /// durable record.
    PersistSafetyState {
        /// The record to persist.
        state: SafetyState,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // External Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// Publish a committed batch + proof to external observers (mempool,
    /// application, metrics). Versions strictly increase with no gaps.
    EmitLedgerUpdate {
        /// The committed update.
        update: LedgerUpdate,
    },
}

impl Action {
    /// Whether this action is delegated work returning a callback event.
    pub fn is_delegated(&self) -> bool {
        matches!(
            self,
            Action::VerifyVoteSignature { .. }
                | Action::VerifyTimeoutVoteSignature { .. }
                | Action::VerifyQcSignature { .. }
        )
    }

    /// Whether this action sends network traffic.
    pub fn is_network(&self) -> bool {
        matches!(self, Action::Broadcast { .. } | Action::SendTo { .. })
    }

    /// The action type name, for logs and stats.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SendTo { .. } => "SendTo",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
            Action::VerifyVoteSignature { .. } => "VerifyVoteSignature",
            Action::VerifyTimeoutVoteSignature { .. } => "VerifyTimeoutVoteSignature",
            Action::VerifyQcSignature { .. } => "VerifyQcSignature",
            Action::PersistSafetyState { .. } => "PersistSafetyState",
            Action::EmitLedgerUpdate { .. } => "EmitLedgerUpdate",
        }
    }
}
