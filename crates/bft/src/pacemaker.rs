//! The pacemaker: timeout-driven view progression.
//!
//! Keeps the view counter moving independent of proposal success. One local
//! timeout is outstanding at a time; its duration grows exponentially with
//! consecutive timeouts since the last observed progress and resets when a
//! QC arrives. Expiry produces at most one signed timeout vote per view
//! (repeat expiries rebroadcast the same vote with a fresh nonce), and a
//! quorum of timeout votes forms a [`TimeoutCertificate`] that advances the
//! view without a QC.

use crate::config::BftConfig;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use triad_core::{Action, Event, OutboundMessage, TimerId};
use triad_messages::{TimeoutCertificateGossip, TimeoutVoteGossip};
use triad_types::{
    signing, EpochId, QuorumCertificate, Signature, SignerBitfield, TimeoutCertificate,
    TimeoutVote, ValidatorId, ValidatorSet, View,
};

/// Pacemaker state snapshot for external observability.
#[derive(Debug, Clone, Serialize)]
pub struct PacemakerStatus {
    /// Current view number.
    pub current_view: u64,
    /// Consecutive timeouts since progress was last observed.
    pub consecutive_timeouts: u32,
    /// Current timeout duration in milliseconds.
    pub timeout_ms: u64,
}

/// Drives the view counter for one epoch.
pub struct Pacemaker {
    epoch: EpochId,
    local: ValidatorId,
    validator_set: Arc<ValidatorSet>,

    base_timeout: Duration,
    backoff_rate: u32,
    max_exponent: u32,

    /// The view currently being driven.
    current_view: View,

    /// Timeouts fired since the last QC advanced the view. Scales the
    /// timeout exponentially.
    consecutive_timeouts: u32,

    /// Highest QC known; attached to timeout votes so the next leader can
    /// recover liveness from the freshest certified vertex.
    high_qc: QuorumCertificate,

    /// Highest TC seen, kept for proposal justification.
    highest_tc: Option<TimeoutCertificate>,

    /// Our own timeout vote for the current view, retained so repeat timer
    /// fires rebroadcast instead of re-signing.
    last_timeout_vote: Option<TimeoutVote>,

    /// Counter making each rebroadcast distinct to dedup-by-content gossip.
    broadcast_nonce: u64,

    /// Verified timeout votes per view.
    collector: BTreeMap<View, IndexMap<ValidatorId, TimeoutVote>>,

    /// Votes whose signatures are out for verification.
    pending_verifications: HashSet<(View, ValidatorId)>,

    /// Views a TC was already emitted for, to not emit twice.
    emitted_tc_for: Option<View>,
}

impl Pacemaker {
    /// Build a pacemaker for an epoch, starting at the view after the
    /// anchor.
    pub fn new(
        epoch: EpochId,
        local: ValidatorId,
        validator_set: Arc<ValidatorSet>,
        config: &BftConfig,
        high_qc: QuorumCertificate,
    ) -> Self {
        Self {
            epoch,
            local,
            validator_set,
            base_timeout: config.pacemaker_base_timeout,
            backoff_rate: config.pacemaker_backoff_rate.max(2),
            max_exponent: config.pacemaker_max_exponent,
            current_view: high_qc.view().next(),
            consecutive_timeouts: 0,
            high_qc,
            highest_tc: None,
            last_timeout_vote: None,
            broadcast_nonce: 0,
            collector: BTreeMap::new(),
            pending_verifications: HashSet::new(),
            emitted_tc_for: None,
        }
    }

    /// The view currently being driven.
    pub fn current_view(&self) -> View {
        self.current_view
    }

    /// The highest QC known to this pacemaker.
    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.high_qc
    }

    /// The highest TC seen, if any.
    pub fn highest_tc(&self) -> Option<&TimeoutCertificate> {
        self.highest_tc.as_ref()
    }

    /// Status snapshot.
    pub fn status(&self) -> PacemakerStatus {
        PacemakerStatus {
            current_view: self.current_view.0,
            consecutive_timeouts: self.consecutive_timeouts,
            timeout_ms: self.current_timeout().as_millis() as u64,
        }
    }

    /// The timeout for the current view:
    /// `base × rate^min(consecutive_timeouts, cap)`.
    pub fn current_timeout(&self) -> Duration {
        let exponent = self.consecutive_timeouts.min(self.max_exponent);
        self.base_timeout * self.backoff_rate.pow(exponent)
    }

    /// Arm the local timeout for the current view.
    pub fn arm_timeout(&self) -> Action {
        Action::SetTimer {
            id: TimerId::Pacemaker,
            duration: self.current_timeout(),
        }
    }

    /// Adopt a higher QC (progress for timeout-vote freshness only; view
    /// advancement goes through [`Self::process_qc_view`]).
    pub fn update_high_qc(&mut self, qc: &QuorumCertificate) {
        if qc.view() > self.high_qc.view() {
            self.high_qc = qc.clone();
        }
    }

    /// React to a QC for `view`: advance to `view + 1` if that moves us
    /// forward, resetting the backoff (progress observed). Returns the new
    /// view when advanced.
    pub fn process_qc_view(&mut self, view: View) -> Option<View> {
        if view < self.current_view {
            return None;
        }
        self.advance_to(view.next());
        self.consecutive_timeouts = 0;
        debug!(view = self.current_view.0, "View advanced by QC");
        Some(self.current_view)
    }

    /// React to a TC: advance past the certified timed-out view. The
    /// backoff is not reset; only QCs count as progress. Returns the new
    /// view when advanced.
    pub fn process_tc(&mut self, tc: &TimeoutCertificate) -> Option<View> {
        if tc.epoch != self.epoch {
            return None;
        }
        let better = self
            .highest_tc
            .as_ref()
            .map(|have| tc.view > have.view)
            .unwrap_or(true);
        if better {
            self.highest_tc = Some(tc.clone());
        }
        if tc.view < self.current_view {
            return None;
        }
        self.advance_to(tc.view.next());
        info!(view = self.current_view.0, "View advanced by TC");
        Some(self.current_view)
    }

    fn advance_to(&mut self, view: View) {
        self.current_view = view;
        self.last_timeout_vote = None;
        self.prune_stale();
    }

    /// Note a local timeout fire for `view`. Returns false for stale fires
    /// (the timer belonged to a view we already left). On a genuine fire
    /// the backoff deepens.
    pub fn register_timeout(&mut self, view: View) -> bool {
        if view != self.current_view {
            trace!(
                fired = view.0,
                current = self.current_view.0,
                "Ignoring stale pacemaker timeout"
            );
            return false;
        }
        self.consecutive_timeouts += 1;
        true
    }

    /// Rebroadcast our existing timeout vote for the current view, if we
    /// signed one. Keeps retrying lossy links without re-counting the vote.
    pub fn rebroadcast_timeout_vote(&mut self) -> Option<OutboundMessage> {
        let vote = self.last_timeout_vote.as_ref()?;
        if vote.view != self.current_view {
            return None;
        }
        self.broadcast_nonce += 1;
        debug!(
            view = vote.view.0,
            nonce = self.broadcast_nonce,
            "Rebroadcasting timeout vote"
        );
        Some(OutboundMessage::TimeoutVote(TimeoutVoteGossip::with_nonce(
            vote.clone(),
            self.broadcast_nonce,
        )))
    }

    /// Record our own freshly signed timeout vote and return the broadcast
    /// plus the local count of it.
    pub fn broadcast_own_timeout_vote(&mut self, vote: TimeoutVote) -> Vec<Action> {
        self.last_timeout_vote = Some(vote.clone());
        self.broadcast_nonce += 1;
        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::TimeoutVote(TimeoutVoteGossip::with_nonce(
                vote.clone(),
                self.broadcast_nonce,
            )),
        }];
        actions.extend(self.finalize_timeout_vote(vote));
        actions
    }

    /// Handle a timeout vote from the network: validate at the boundary and
    /// delegate the signature check. The verified callback lands in
    /// [`Self::on_timeout_vote_verified`].
    pub fn on_timeout_vote(&mut self, vote: TimeoutVote) -> Vec<Action> {
        if vote.epoch != self.epoch {
            debug!(vote_epoch = vote.epoch.0, "Ignoring timeout vote from other epoch");
            return vec![];
        }
        if vote.view < self.current_view {
            trace!(
                vote_view = vote.view.0,
                current = self.current_view.0,
                "Ignoring timeout vote for stale view"
            );
            return vec![];
        }
        let key = (vote.view, vote.voter);
        if self.pending_verifications.contains(&key) {
            return vec![];
        }
        if self
            .collector
            .get(&vote.view)
            .is_some_and(|votes| votes.contains_key(&vote.voter))
        {
            trace!(voter = ?vote.voter, "Duplicate timeout vote");
            return vec![];
        }
        let Some(public_key) = self.validator_set.public_key(vote.voter).cloned() else {
            warn!(voter = ?vote.voter, "Timeout vote from validator outside the committee");
            return vec![];
        };

        // The attached high QC is validated here at the boundary. A genesis
        // anchor is only plausible at the very start of the epoch.
        if vote.high_qc.is_genesis() {
            if vote.high_qc.view() != View::GENESIS {
                warn!(voter = ?vote.voter, "Timeout vote carries a non-anchor genesis QC");
                return vec![];
            }
        } else if let Err(e) = vote.high_qc.check(&self.validator_set) {
            warn!(voter = ?vote.voter, error = %e, "Timeout vote carries an invalid high QC");
            return vec![];
        }

        self.pending_verifications.insert(key);
        let signing_message = signing::timeout_message(vote.epoch, vote.view);
        vec![Action::VerifyTimeoutVoteSignature {
            public_key,
            signing_message,
            vote,
        }]
    }

    /// Callback from `Action::VerifyTimeoutVoteSignature`.
    pub fn on_timeout_vote_verified(&mut self, vote: TimeoutVote, valid: bool) -> Vec<Action> {
        let key = (vote.view, vote.voter);
        if !self.pending_verifications.remove(&key) {
            warn!(voter = ?vote.voter, "Timeout vote verified but not pending");
            return vec![];
        }
        if !valid {
            warn!(voter = ?vote.voter, view = vote.view.0, "Invalid timeout vote signature");
            return vec![];
        }
        self.finalize_timeout_vote(vote)
    }

    /// Count a verified timeout vote; emit `TimeoutQuorumFormed` when the
    /// view reaches quorum.
    fn finalize_timeout_vote(&mut self, vote: TimeoutVote) -> Vec<Action> {
        if vote.view < self.current_view {
            return vec![];
        }
        let view = vote.view;
        let votes = self.collector.entry(view).or_default();
        if votes.contains_key(&vote.voter) {
            return vec![];
        }
        votes.insert(vote.voter, vote);

        let power: u64 = votes
            .keys()
            .filter_map(|&voter| self.validator_set.voting_power(voter))
            .sum();
        debug!(
            view = view.0,
            power,
            total = self.validator_set.total_voting_power(),
            "Timeout vote counted"
        );
        if !self.validator_set.has_quorum(power) {
            return vec![];
        }
        if self.emitted_tc_for == Some(view) {
            return vec![];
        }

        match self.build_tc(view) {
            Some(certificate) => {
                info!(view = view.0, "Timeout quorum reached, TC formed");
                self.emitted_tc_for = Some(view);
                vec![
                    // Share the certificate so laggards advance without
                    // collecting every vote themselves.
                    Action::Broadcast {
                        message: OutboundMessage::TimeoutCertificate(TimeoutCertificateGossip {
                            certificate: certificate.clone(),
                        }),
                    },
                    Action::EnqueueInternal {
                        event: Event::TimeoutQuorumFormed { certificate },
                    },
                ]
            }
            None => {
                warn!(view = view.0, "Failed to assemble TC from quorum of votes");
                vec![]
            }
        }
    }

    /// Assemble a TC from the collected votes for a view.
    fn build_tc(&self, view: View) -> Option<TimeoutCertificate> {
        let votes = self.collector.get(&view)?;
        let mut signers = SignerBitfield::new(self.validator_set.len());
        let mut signatures = Vec::with_capacity(votes.len());
        let mut best_qc: Option<&QuorumCertificate> = None;
        for vote in votes.values() {
            let index = self.validator_set.index_of(vote.voter)?;
            signers.set(index);
            signatures.push(vote.signature.clone());
            if best_qc.map(|qc| vote.high_qc.view() > qc.view()).unwrap_or(true) {
                best_qc = Some(&vote.high_qc);
            }
        }
        let aggregated_signature = Signature::aggregate(&signatures).ok()?;
        Some(TimeoutCertificate {
            epoch: self.epoch,
            view,
            high_qc: best_qc?.clone(),
            aggregated_signature,
            signers,
        })
    }

    /// Drop collector state for views below the current one.
    fn prune_stale(&mut self) {
        let current = self.current_view;
        self.collector.retain(|&view, _| view >= current);
        self.pending_verifications
            .retain(|&(view, _)| view >= current);
        if self.emitted_tc_for.is_some_and(|view| view < current) {
            // Keep the marker only while the view could still resurface.
            self.emitted_tc_for = None;
        }
    }

    /// Whether this node leads nothing here; the epoch manager consults the
    /// proposer election. Exposed for logs.
    pub fn local_validator(&self) -> ValidatorId {
        self.local
    }
}
