//! The epoch manager: top-level orchestration of one epoch's consensus
//! components.
//!
//! Owns the epoch-scoped pacemaker, vertex store, proposer election, vote
//! collection, and vertex sync, plus the long-lived safety rules. Routes
//! verified inputs between them, and on a committed epoch boundary tears
//! the epoch down and rebuilds everything against the new validator set,
//! re-anchored at the boundary vertex.

use crate::{
    BftConfig, Pacemaker, PendingVotes, ProposerElection, RetryOutcome, VertexStore,
    VertexStoreError, VertexSync, VoteInsertion, WeightedRoundRobin,
};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};
use triad_core::{
    Action, Event, Ledger, MempoolSource, OutboundMessage, StateComputer, TimerId,
};
use triad_messages::{
    GetVerticesErrorResponse, GetVerticesResponse, Proposal, ProposalGossip, VoteGossip,
};
use triad_safety::SafetyRules;
use triad_types::{
    signing, EpochId, ExecutedVertex, Hash, KeyPair, LedgerUpdate, QuorumCertificate, SafetyState,
    TimeoutCertificate, TimeoutVote, ValidatorId, ValidatorSet, Vertex, View, Vote,
};

/// A partial ancestor chain parked until an even deeper fetch completes.
struct StagedChain {
    /// Vertices oldest-first, ready to insert once the parent of the first
    /// one lands.
    vertices: Vec<Vertex>,
    /// The certificate whose vertex tops the chain.
    qc: QuorumCertificate,
    /// Proposals parked on the original gap.
    parked: Vec<Proposal>,
}

/// Everything scoped to a single epoch; rebuilt at every boundary.
struct EpochState {
    epoch: EpochId,
    validator_set: Arc<ValidatorSet>,
    election: WeightedRoundRobin,
    pacemaker: Pacemaker,
    vertex_store: VertexStore,
    vertex_sync: VertexSync,
    pending_votes: PendingVotes,

    /// Votes whose signatures are out for verification.
    pending_vote_verifications: HashSet<(Hash, ValidatorId)>,

    /// Proposals whose parent QC is out for verification, by vertex hash.
    pending_qc_verifications: HashMap<Hash, Proposal>,

    /// Partial sync chains waiting on a deeper ancestor.
    /// Iteration order is observable when several chains become ready
    /// at once, so the map keeps insertion order.
    staged: IndexMap<Hash, StagedChain>,

    /// Highest view this node proposed in (propose once per view).
    last_proposed_view: View,
}

/// The consensus engine for one validator.
pub struct EpochManager {
    local: ValidatorId,
    config: BftConfig,
    state_computer: Arc<dyn StateComputer>,
    ledger: Arc<dyn Ledger>,
    mempool: Arc<dyn MempoolSource>,
    safety: SafetyRules,
    epoch: EpochState,
    now: Duration,
}

impl EpochManager {
    /// Build the engine from the committed ledger state.
    ///
    /// The epoch and anchor derive from the ledger's latest proof: a
    /// boundary proof starts the next epoch fresh; any other proof resumes
    /// its epoch re-anchored at the committed vertex. `validator_set` is
    /// the set for the resumed epoch (ignored when the proof carries the
    /// next set). A recovered safety record is honored when it matches the
    /// epoch, so a restarting node cannot re-vote views it already signed.
    pub fn new(
        local: ValidatorId,
        signing_key: KeyPair,
        validator_set: ValidatorSet,
        config: BftConfig,
        state_computer: Arc<dyn StateComputer>,
        ledger: Arc<dyn Ledger>,
        mempool: Arc<dyn MempoolSource>,
        recovered_safety: Option<SafetyState>,
    ) -> Self {
        let proof = ledger.latest_proof();
        let header = proof.header().clone();
        let (epoch, set, store) = match header.next_validator_set {
            Some(next_set) => {
                let epoch = header.info.epoch.next();
                let anchor =
                    ExecutedVertex::anchor(epoch, header.info.version, header.info.accumulator);
                let store =
                    VertexStore::new(anchor, state_computer.clone(), ledger.clone());
                (epoch, next_set, store)
            }
            None => {
                let epoch = header.info.epoch;
                let store = if header.info.view == View::GENESIS {
                    let anchor = ExecutedVertex::anchor(
                        epoch,
                        header.info.version,
                        header.info.accumulator,
                    );
                    VertexStore::new(anchor, state_computer.clone(), ledger.clone())
                } else {
                    VertexStore::recover(
                        header.info.clone(),
                        state_computer.clone(),
                        ledger.clone(),
                    )
                };
                (epoch, validator_set, store)
            }
        };
        let validator_set = Arc::new(set);
        let safety_state = recovered_safety
            .filter(|state| state.epoch == epoch)
            .unwrap_or_else(|| SafetyState::new(epoch));
        let safety = SafetyRules::new(local, signing_key, safety_state);
        let election = WeightedRoundRobin::new(&validator_set);
        let pacemaker = Pacemaker::new(
            epoch,
            local,
            validator_set.clone(),
            &config,
            store.high_qc().clone(),
        );
        info!(
            validator = ?local,
            epoch = epoch.0,
            root_view = store.root().view().0,
            "Epoch manager constructed"
        );
        Self {
            local,
            epoch: EpochState {
                epoch,
                validator_set,
                election,
                pacemaker,
                vertex_store: store,
                vertex_sync: VertexSync::new(&config),
                pending_votes: PendingVotes::new(),
                pending_vote_verifications: HashSet::new(),
                pending_qc_verifications: HashMap::new(),
                staged: IndexMap::new(),
                last_proposed_view: View::GENESIS,
            },
            config,
            state_computer,
            ledger,
            mempool,
            safety,
            now: Duration::ZERO,
        }
    }

    /// Set the current time. Called by the node before every event.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Current epoch.
    pub fn epoch(&self) -> EpochId {
        self.epoch.epoch
    }

    /// Current pacemaker view.
    pub fn current_view(&self) -> View {
        self.epoch.pacemaker.current_view()
    }

    /// The epoch's validator set.
    pub fn validator_set(&self) -> Arc<ValidatorSet> {
        self.epoch.validator_set.clone()
    }

    /// The vertex store (for status and tests).
    pub fn vertex_store(&self) -> &VertexStore {
        &self.epoch.vertex_store
    }

    /// Pacemaker status snapshot.
    pub fn pacemaker_status(&self) -> crate::PacemakerStatus {
        self.epoch.pacemaker.status()
    }

    /// Requests emitted by vertex sync (rate-bound checks).
    pub fn vertex_requests_sent(&self) -> u64 {
        self.epoch.vertex_sync.requests_sent()
    }

    /// Kick off the epoch: arm the pacemaker and propose if we lead the
    /// opening view.
    pub fn start(&mut self) -> Vec<Action> {
        self.enter_view_actions()
    }

    fn now_ms(&self) -> u64 {
        self.now.as_millis() as u64
    }

    // ═══════════════════════════════════════════════════════════════════════
    // View entry and proposal emission
    // ═══════════════════════════════════════════════════════════════════════

    /// Arm the timeout for the (possibly just-entered) current view and
    /// propose once if we lead it.
    fn enter_view_actions(&mut self) -> Vec<Action> {
        let view = self.epoch.pacemaker.current_view();
        let mut actions = vec![self.epoch.pacemaker.arm_timeout()];
        if self.epoch.election.is_leader(view, self.local)
            && self.epoch.last_proposed_view < view
        {
            actions.extend(self.propose(view));
        }
        actions
    }

    /// Build and broadcast this view's proposal from the high QC.
    #[instrument(skip(self), fields(validator = ?self.local, view = view.0))]
    fn propose(&mut self, view: View) -> Vec<Action> {
        let high_qc = self.epoch.vertex_store.high_qc().clone();
        if !self.epoch.vertex_store.contains(&high_qc.vertex_hash()) {
            warn!("Cannot propose: high QC vertex not in store");
            return vec![];
        }
        let via_timeout = view > high_qc.view().next();
        let timeout_certificate = if via_timeout {
            match self.epoch.pacemaker.highest_tc() {
                Some(tc) if tc.view.next() == view => Some(tc.clone()),
                _ => {
                    warn!("Cannot propose: view reached by timeout but no TC held");
                    return vec![];
                }
            }
        } else {
            None
        };
        // A timeout proposal inherits the certified weighted time so a
        // byzantine leader cannot steer consensus time across a stall.
        let timestamp_ms = if via_timeout {
            high_qc.weighted_timestamp_ms
        } else {
            self.now_ms()
        };
        let transactions = self
            .mempool
            .next_batch(self.config.max_transactions_per_proposal);
        let vertex = Vertex {
            epoch: self.epoch.epoch,
            view,
            parent_qc: high_qc,
            transactions,
            proposer: self.local,
            timestamp_ms,
        };
        info!(
            vertex_hash = ?vertex.hash(),
            transactions = vertex.transactions.len(),
            via_timeout,
            "Proposing"
        );
        self.epoch.last_proposed_view = view;
        let proposal = match timeout_certificate {
            Some(tc) => Proposal::with_timeout_certificate(vertex, tc),
            None => Proposal::new(vertex),
        };
        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::Proposal(ProposalGossip {
                proposal: proposal.clone(),
            }),
        }];
        // Process our own proposal the same way receivers do.
        actions.extend(self.on_proposal(proposal));
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposal intake
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a proposal from the network (or our own loopback).
    #[instrument(skip(self, proposal), fields(
        view = proposal.view().0,
        proposer = ?proposal.vertex.proposer
    ))]
    pub fn on_proposal(&mut self, proposal: Proposal) -> Vec<Action> {
        if proposal.epoch() != self.epoch.epoch {
            debug!(
                proposal_epoch = proposal.epoch().0,
                current_epoch = self.epoch.epoch.0,
                "Dropping proposal from another epoch"
            );
            return vec![];
        }
        if let Err(reason) = self.validate_proposal(&proposal) {
            warn!(reason, "Rejecting proposal");
            return vec![];
        }

        let mut actions = vec![];
        // A TC riding on the proposal may advance our view first.
        if let Some(tc) = proposal.timeout_certificate.clone() {
            actions.extend(self.process_tc(tc));
        }

        let vertex_hash = proposal.vertex.hash();
        if self.epoch.vertex_store.contains(&vertex_hash)
            || self.epoch.pending_qc_verifications.contains_key(&vertex_hash)
        {
            trace!(vertex_hash = ?vertex_hash, "Duplicate proposal");
            return actions;
        }

        let parent_qc = proposal.vertex.parent_qc.clone();
        if parent_qc.is_genesis() {
            // Anchor-certified: validated against our root already; no
            // signatures to check.
            actions.extend(self.process_verified_proposal(proposal));
            return actions;
        }

        if !self.epoch.vertex_store.contains(&parent_qc.vertex_hash()) {
            // Missing ancestor chain; fetch it and park the proposal.
            let proposer = proposal.vertex.proposer;
            self.epoch
                .vertex_sync
                .buffer_proposal(parent_qc.vertex_hash(), proposal);
            actions.extend(
                self.epoch
                    .vertex_sync
                    .request_ancestors(&parent_qc, proposer, self.now),
            );
            return actions;
        }

        // Parent known: the parent QC's aggregated signature is the last
        // thing between us and voting. Delegate it.
        let Some(public_keys) = self
            .epoch
            .validator_set
            .keys_for_indices(parent_qc.signers.set_indices())
        else {
            warn!("Proposal parent QC names signers outside the committee");
            return actions;
        };
        let signing_message = signing::vote_message(&parent_qc.vote_data);
        self.epoch
            .pending_qc_verifications
            .insert(vertex_hash, proposal);
        actions.push(Action::VerifyQcSignature {
            qc: parent_qc,
            public_keys,
            vertex_hash,
            signing_message,
        });
        actions
    }

    /// Structural proposal validation at the message boundary. Nothing past
    /// this point re-checks well-formedness.
    fn validate_proposal(&self, proposal: &Proposal) -> Result<(), String> {
        let vertex = &proposal.vertex;
        let view = vertex.view;
        let parent_qc = &vertex.parent_qc;

        if view <= vertex.parent_view() {
            return Err(format!(
                "view {} does not exceed parent view {}",
                view.0,
                vertex.parent_view().0
            ));
        }
        let expected = self.epoch.election.leader(view);
        if vertex.proposer != expected {
            return Err(format!(
                "wrong proposer: expected {:?}, got {:?}",
                expected, vertex.proposer
            ));
        }

        // View justification: extend the parent QC directly, or carry a TC
        // for the view directly below.
        let direct = view == parent_qc.view().next();
        if !direct {
            let Some(tc) = &proposal.timeout_certificate else {
                return Err(format!(
                    "view {} skips past QC view {} without a TC",
                    view.0,
                    parent_qc.view().0
                ));
            };
            if tc.epoch != self.epoch.epoch || tc.view.next() != view {
                return Err(format!(
                    "TC for view {} does not justify proposing at view {}",
                    tc.view.0, view.0
                ));
            }
            if let Err(e) = tc.check(&self.epoch.validator_set) {
                return Err(format!("invalid TC under proposal: {e}"));
            }
            if parent_qc.view() < tc.high_qc.view() {
                return Err(format!(
                    "proposal ignores the TC's high QC (parent view {}, TC high QC view {})",
                    parent_qc.view().0,
                    tc.high_qc.view().0
                ));
            }
        }

        if parent_qc.is_genesis() {
            // Only the epoch anchor is certified without signatures.
            if parent_qc.vertex_hash() != self.epoch.vertex_store.root().hash() {
                return Err("genesis QC does not certify our root".to_string());
            }
        } else if let Err(e) = parent_qc.verify_quorum(&self.epoch.validator_set) {
            return Err(format!("parent QC fails quorum arithmetic: {e}"));
        }

        // Timestamp sanity; timeout proposals inherit certified time and
        // are exempt.
        if direct && !parent_qc.is_genesis() {
            let now = self.now_ms();
            if vertex.timestamp_ms + self.config.max_timestamp_delay_ms < now {
                return Err(format!(
                    "proposal timestamp {} too far behind local clock {}",
                    vertex.timestamp_ms, now
                ));
            }
            if vertex.timestamp_ms > now + self.config.max_timestamp_rush_ms {
                return Err(format!(
                    "proposal timestamp {} too far ahead of local clock {}",
                    vertex.timestamp_ms, now
                ));
            }
        }
        Ok(())
    }

    /// Callback from `Action::VerifyQcSignature`.
    pub fn on_qc_verified(&mut self, vertex_hash: Hash, valid: bool) -> Vec<Action> {
        let Some(proposal) = self.epoch.pending_qc_verifications.remove(&vertex_hash) else {
            warn!(vertex_hash = ?vertex_hash, "QC verified but no pending proposal");
            return vec![];
        };
        if !valid {
            warn!(
                vertex_hash = ?vertex_hash,
                proposer = ?proposal.vertex.proposer,
                "Parent QC signature verification FAILED; rejecting proposal as byzantine"
            );
            return vec![];
        }
        self.process_verified_proposal(proposal)
    }

    /// Adopt a fully verified proposal: absorb its parent QC, execute the
    /// vertex, and vote if it is for the current view.
    fn process_verified_proposal(&mut self, proposal: Proposal) -> Vec<Action> {
        let mut actions = self.process_certificate(&proposal.vertex.parent_qc.clone());
        let proposer = proposal.vertex.proposer;

        match self.epoch.vertex_store.insert_vertex(proposal.vertex.clone()) {
            Ok(info) => {
                if info.view == self.epoch.pacemaker.current_view() {
                    actions.extend(self.try_vote(&info.vertex_hash));
                } else {
                    debug!(
                        vertex_view = info.view.0,
                        current_view = self.epoch.pacemaker.current_view().0,
                        "Not voting: proposal is not for the current view"
                    );
                }
            }
            Err(VertexStoreError::MissingParent { parent_hash, .. }) => {
                // The parent QC processing can prune past the parent in
                // rare interleavings; fall back to sync.
                self.epoch
                    .vertex_sync
                    .buffer_proposal(parent_hash, proposal.clone());
                actions.extend(self.epoch.vertex_sync.request_ancestors(
                    &proposal.vertex.parent_qc,
                    proposer,
                    self.now,
                ));
            }
            Err(VertexStoreError::StaleVertex { .. }) => {
                trace!("Proposal below committed root");
            }
            Err(e) => warn!(error = %e, "Failed to insert proposed vertex"),
        }
        actions
    }

    /// Ask the safety rules for a vote on a stored vertex and broadcast it.
    fn try_vote(&mut self, vertex_hash: &Hash) -> Vec<Action> {
        let Some((vote_data, grandparent_view)) =
            self.epoch.vertex_store.vote_data_for(vertex_hash)
        else {
            warn!(vertex_hash = ?vertex_hash, "No vote data for stored vertex");
            return vec![];
        };
        match self
            .safety
            .construct_vote(&vote_data, grandparent_view, self.now_ms())
        {
            Ok(vote) => {
                // Persist strictly before the broadcast: the runner
                // executes action batches in order.
                let mut actions = vec![
                    Action::PersistSafetyState {
                        state: self.safety.state().clone(),
                    },
                    Action::Broadcast {
                        message: OutboundMessage::Vote(VoteGossip { vote: vote.clone() }),
                    },
                ];
                actions.extend(self.finalize_vote(vote));
                actions
            }
            Err(refusal) => {
                debug!(reason = %refusal, "Safety rules refused vote");
                vec![]
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vote intake and QC formation
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a vote from the network.
    pub fn on_vote(&mut self, vote: Vote) -> Vec<Action> {
        if vote.epoch() != self.epoch.epoch {
            debug!(vote_epoch = vote.epoch().0, "Dropping vote from another epoch");
            return vec![];
        }
        // Skip stale votes before burning crypto on them.
        if vote.view() <= self.epoch.vertex_store.root().view() {
            trace!(vote_view = vote.view().0, "Skipping vote for committed history");
            return vec![];
        }
        if vote.voter == self.local {
            // Our own vote was counted when it was constructed.
            return vec![];
        }
        let Some(public_key) = self.epoch.validator_set.public_key(vote.voter).cloned() else {
            warn!(voter = ?vote.voter, "Vote from validator outside the committee");
            return vec![];
        };
        let key = (vote.vertex_hash(), vote.voter);
        if !self.epoch.pending_vote_verifications.insert(key) {
            trace!(voter = ?vote.voter, "Vote verification already pending");
            return vec![];
        }
        let signing_message = signing::vote_message(&vote.vote_data);
        vec![Action::VerifyVoteSignature {
            vote,
            public_key,
            signing_message,
        }]
    }

    /// Callback from `Action::VerifyVoteSignature`.
    pub fn on_vote_verified(&mut self, vote: Vote, valid: bool) -> Vec<Action> {
        let key = (vote.vertex_hash(), vote.voter);
        if !self.epoch.pending_vote_verifications.remove(&key) {
            warn!(voter = ?vote.voter, "Vote verified but not pending");
            return vec![];
        }
        if !valid {
            warn!(voter = ?vote.voter, view = vote.view().0, "Invalid vote signature");
            return vec![];
        }
        self.finalize_vote(vote)
    }

    /// Count a verified vote; a completed quorum surfaces as an internal
    /// `QuorumFormed`.
    fn finalize_vote(&mut self, vote: Vote) -> Vec<Action> {
        match self
            .epoch
            .pending_votes
            .insert(vote, &self.epoch.validator_set)
        {
            VoteInsertion::QuorumReached(qc) => {
                info!(view = qc.view().0, vertex_hash = ?qc.vertex_hash(), "Quorum formed");
                vec![Action::EnqueueInternal {
                    event: Event::QuorumFormed { qc },
                }]
            }
            VoteInsertion::Added | VoteInsertion::Duplicate => vec![],
            // Evidence logged by the collector; the vote is not counted.
            VoteInsertion::Equivocation { .. } => vec![],
        }
    }

    /// Handle an internally formed QC.
    pub fn on_quorum_formed(&mut self, qc: QuorumCertificate) -> Vec<Action> {
        self.process_certificate(&qc)
    }

    /// Absorb a certificate: hand it to the vertex store (commits flow out
    /// as ledger updates), adopt it for timeout votes, and advance the
    /// pacemaker.
    fn process_certificate(&mut self, qc: &QuorumCertificate) -> Vec<Action> {
        let mut actions = vec![];
        match self.epoch.vertex_store.insert_qc(qc) {
            Ok(Some(update)) => actions.extend(self.on_commit(update)),
            Ok(None) => {}
            Err(VertexStoreError::MissingVertex { .. }) => {
                // The certified vertex itself is unknown; fetch its chain
                // from the view's leader.
                let mut peer = self.epoch.election.leader(qc.view());
                if peer == self.local {
                    peer = self.fallback_peer(peer);
                }
                actions.extend(
                    self.epoch
                        .vertex_sync
                        .request_ancestors(qc, peer, self.now),
                );
            }
            Err(e @ VertexStoreError::ByzantineQuorum { .. }) => {
                // Already logged at error level by the store; nothing can
                // repair a forked commit.
                error!(error = %e, "Halting branch on byzantine quorum evidence");
            }
            Err(e) => warn!(error = %e, "Failed to absorb certificate"),
        }
        self.epoch
            .pacemaker
            .update_high_qc(self.epoch.vertex_store.high_qc());
        if self.epoch.pacemaker.process_qc_view(qc.view()).is_some() {
            actions.extend(self.enter_view_actions());
        }
        actions
    }

    /// A chain committed: notify collaborators and publish the update.
    fn on_commit(&mut self, update: LedgerUpdate) -> Vec<Action> {
        self.mempool.notify_committed(&update);
        self.epoch
            .pending_votes
            .prune_below(self.epoch.vertex_store.root().view());
        vec![
            Action::EmitLedgerUpdate {
                update: update.clone(),
            },
            Action::EnqueueInternal {
                event: Event::LedgerCommitted { update },
            },
        ]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Pacemaker events
    // ═══════════════════════════════════════════════════════════════════════

    /// The local pacemaker timeout fired.
    pub fn on_pacemaker_timeout(&mut self, view: View) -> Vec<Action> {
        if !self.epoch.pacemaker.register_timeout(view) {
            return vec![];
        }
        let mut actions = vec![self.epoch.pacemaker.arm_timeout()];
        if let Some(message) = self.epoch.pacemaker.rebroadcast_timeout_vote() {
            actions.push(Action::Broadcast { message });
            return actions;
        }
        let high_qc = self.epoch.pacemaker.high_qc().clone();
        match self
            .safety
            .construct_timeout(self.epoch.epoch, view, high_qc)
        {
            Ok(vote) => {
                info!(view = view.0, "View timed out, broadcasting timeout vote");
                actions.push(Action::PersistSafetyState {
                    state: self.safety.state().clone(),
                });
                actions.extend(self.epoch.pacemaker.broadcast_own_timeout_vote(vote));
            }
            Err(refusal) => debug!(reason = %refusal, "Safety rules refused timeout vote"),
        }
        actions
    }

    /// A timeout vote arrived from the network.
    pub fn on_timeout_vote(&mut self, vote: TimeoutVote) -> Vec<Action> {
        self.epoch.pacemaker.on_timeout_vote(vote)
    }

    /// Callback from `Action::VerifyTimeoutVoteSignature`.
    pub fn on_timeout_vote_verified(&mut self, vote: TimeoutVote, valid: bool) -> Vec<Action> {
        self.epoch.pacemaker.on_timeout_vote_verified(vote, valid)
    }

    /// A TC we assembled ourselves reached quorum.
    pub fn on_timeout_quorum_formed(&mut self, tc: TimeoutCertificate) -> Vec<Action> {
        self.process_tc(tc)
    }

    /// A TC gossiped by a peer.
    pub fn on_timeout_certificate(&mut self, tc: TimeoutCertificate) -> Vec<Action> {
        if tc.epoch != self.epoch.epoch {
            debug!(tc_epoch = tc.epoch.0, "Dropping TC from another epoch");
            return vec![];
        }
        if tc.view < self.epoch.pacemaker.current_view() {
            trace!(tc_view = tc.view.0, "Dropping stale TC");
            return vec![];
        }
        if let Err(e) = tc.check(&self.epoch.validator_set) {
            warn!(error = %e, "Invalid TC");
            return vec![];
        }
        if tc.high_qc.is_genesis() {
            if tc.high_qc.view() != View::GENESIS {
                warn!("TC carries a non-anchor genesis QC");
                return vec![];
            }
        } else if let Err(e) = tc.high_qc.check(&self.epoch.validator_set) {
            warn!(error = %e, "TC carries an invalid high QC");
            return vec![];
        }
        self.process_tc(tc)
    }

    fn process_tc(&mut self, tc: TimeoutCertificate) -> Vec<Action> {
        let mut actions = self.process_certificate(&tc.high_qc.clone());
        if self.epoch.pacemaker.process_tc(&tc).is_some() {
            actions.extend(self.enter_view_actions());
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vertex sync
    // ═══════════════════════════════════════════════════════════════════════

    /// Serve a peer's ancestor request from our store.
    pub fn on_vertex_request(
        &mut self,
        from: ValidatorId,
        vertex_hash: Hash,
        count: u32,
    ) -> Vec<Action> {
        let capped = count.min(self.config.vertex_request_count.max(1) * 4);
        match self.epoch.vertex_store.get_chain(vertex_hash, capped) {
            Some(vertices) => vec![Action::SendTo {
                peer: from,
                message: OutboundMessage::VertexResponse(GetVerticesResponse::new(vertices)),
            }],
            None => vec![Action::SendTo {
                peer: from,
                message: OutboundMessage::VertexErrorResponse(GetVerticesErrorResponse {
                    vertex_hash,
                    high_qc: self.epoch.vertex_store.high_qc().clone(),
                }),
            }],
        }
    }

    /// A peer answered one of our ancestor requests.
    pub fn on_vertex_response(&mut self, from: ValidatorId, vertices: Vec<Vertex>) -> Vec<Action> {
        let Some(newest) = vertices.first() else {
            warn!(from = ?from, "Empty vertex response");
            return vec![];
        };
        let requested = newest.hash();
        if !self.epoch.vertex_sync.is_outstanding(&requested) {
            trace!(vertex_hash = ?requested, "Unsolicited vertex response");
            return vec![];
        }

        if let Err(reason) = self.validate_vertex_chain(&vertices) {
            warn!(from = ?from, reason, "Invalid vertex response; retrying elsewhere");
            return self.retry_vertex_fetch(requested, from);
        }
        let Some((qc, parked)) = self.epoch.vertex_sync.complete(&requested) else {
            return vec![];
        };
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::VertexRequest(requested),
        }];

        let mut ascending = vertices;
        ascending.reverse();
        let oldest_parent = ascending[0].parent_hash();
        if !self.epoch.vertex_store.contains(&oldest_parent) {
            // The chain hangs deeper than this response reaches; stage it
            // and fetch further down.
            let deeper_qc = ascending[0].parent_qc.clone();
            self.epoch.staged.insert(
                oldest_parent,
                StagedChain {
                    vertices: ascending,
                    qc,
                    parked,
                },
            );
            actions.extend(
                self.epoch
                    .vertex_sync
                    .request_ancestors(&deeper_qc, from, self.now),
            );
            return actions;
        }
        actions.extend(self.insert_synced_chain(ascending, qc, parked));
        actions
    }

    /// Boundary validation of a sync response: hash linkage plus full
    /// certificate checks (the sync path verifies aggregates inline).
    fn validate_vertex_chain(&self, vertices: &[Vertex]) -> Result<(), String> {
        for pair in vertices.windows(2) {
            if pair[0].parent_hash() != pair[1].hash() {
                return Err("chain is not parent-linked".to_string());
            }
        }
        for vertex in vertices {
            if vertex.epoch != self.epoch.epoch {
                return Err(format!("vertex from epoch {}", vertex.epoch.0));
            }
            let qc = &vertex.parent_qc;
            if qc.is_genesis() {
                if qc.view() != View::GENESIS {
                    return Err("non-anchor genesis QC in chain".to_string());
                }
            } else if let Err(e) = qc.check(&self.epoch.validator_set) {
                return Err(format!("bad certificate in chain: {e}"));
            }
        }
        Ok(())
    }

    /// Insert a validated ancestor chain oldest-first, absorbing each
    /// certificate on the way, then revive anything parked on it.
    fn insert_synced_chain(
        &mut self,
        chain: Vec<Vertex>,
        qc: QuorumCertificate,
        parked: Vec<Proposal>,
    ) -> Vec<Action> {
        let mut actions = vec![];
        for vertex in chain {
            let parent_qc = vertex.parent_qc.clone();
            if !parent_qc.is_genesis() {
                actions.extend(self.process_certificate(&parent_qc));
            }
            match self.epoch.vertex_store.insert_vertex(vertex) {
                Ok(_) | Err(VertexStoreError::StaleVertex { .. }) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to insert synced vertex");
                    return actions;
                }
            }
        }
        if !qc.is_genesis() {
            actions.extend(self.process_certificate(&qc));
        }
        actions.extend(self.drain_staged());
        for proposal in parked {
            actions.extend(self.on_proposal(proposal));
        }
        actions
    }

    /// Insert any staged chains whose missing ancestor has landed.
    fn drain_staged(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        loop {
            let ready: Vec<Hash> = self
                .epoch
                .staged
                .keys()
                .filter(|hash| self.epoch.vertex_store.contains(hash))
                .copied()
                .collect();
            if ready.is_empty() {
                return actions;
            }
            for hash in ready {
                if let Some(staged) = self.epoch.staged.shift_remove(&hash) {
                    actions.extend(self.insert_synced_chain(
                        staged.vertices,
                        staged.qc,
                        staged.parked,
                    ));
                }
            }
        }
    }

    /// A peer reported it cannot serve a request.
    pub fn on_vertex_error_response(&mut self, from: ValidatorId, vertex_hash: Hash) -> Vec<Action> {
        if self.epoch.vertex_sync.current_peer(&vertex_hash) != Some(from) {
            return vec![];
        }
        debug!(vertex_hash = ?vertex_hash, from = ?from, "Peer cannot serve vertex request");
        self.retry_vertex_fetch(vertex_hash, from)
    }

    /// The patience window for a vertex request elapsed.
    pub fn on_vertex_request_timeout(&mut self, vertex_hash: Hash) -> Vec<Action> {
        let failed = self
            .epoch
            .vertex_sync
            .current_peer(&vertex_hash)
            .unwrap_or(self.local);
        self.retry_vertex_fetch(vertex_hash, failed)
    }

    fn retry_vertex_fetch(&mut self, vertex_hash: Hash, failed: ValidatorId) -> Vec<Action> {
        let fallback = self.fallback_peer(failed);
        match self
            .epoch
            .vertex_sync
            .retry_or_abandon(&vertex_hash, fallback, self.now)
        {
            RetryOutcome::Retried(actions) => actions,
            RetryOutcome::Abandoned(_dropped) => {
                // Reported by the requester; drop any chain staged on it.
                self.epoch.staged.shift_remove(&vertex_hash);
                vec![Action::CancelTimer {
                    id: TimerId::VertexRequest(vertex_hash),
                }]
            }
            RetryOutcome::Unknown => vec![],
        }
    }

    /// First committee member that is neither us nor the excluded peer.
    fn fallback_peer(&self, exclude: ValidatorId) -> ValidatorId {
        self.epoch
            .validator_set
            .iter()
            .map(|v| v.validator_id)
            .find(|&id| id != self.local && id != exclude)
            .unwrap_or(exclude)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Epoch transition
    // ═══════════════════════════════════════════════════════════════════════

    /// A commit landed on the ledger (live path or sync path). When it
    /// carries the next validator set, cross the epoch boundary; when it
    /// came from ledger sync and ran past our root, re-anchor.
    pub fn on_ledger_committed(&mut self, update: &LedgerUpdate) -> Vec<Action> {
        let Some(next_set) = update.next_validator_set() else {
            return self.reanchor_on_synced_commit(update);
        };
        if update.proof.epoch() != self.epoch.epoch {
            // Replay of an older boundary, or a boundary we already
            // crossed. Exactly one transition per epoch.
            debug!(
                proof_epoch = update.proof.epoch().0,
                current_epoch = self.epoch.epoch.0,
                "Ignoring epoch boundary outside the current epoch"
            );
            return vec![];
        }
        self.transition_epoch(update, next_set.clone())
    }

    /// Ledger sync committed history this vertex store never held (the live
    /// path always commits through the store, so its commits are already
    /// rooted there). The pending DAG below the synced head is stale;
    /// re-anchor at the head so consensus resumes from it. The pacemaker
    /// keeps running: its view catches up through the certificates that
    /// arrive once the chain above the new root is fetched.
    fn reanchor_on_synced_commit(&mut self, update: &LedgerUpdate) -> Vec<Action> {
        let header = update.proof.header();
        if header.info.epoch != self.epoch.epoch
            || header.info.version <= self.epoch.vertex_store.root().info.version
            || self.epoch.vertex_store.contains(&header.info.vertex_hash)
        {
            return vec![];
        }
        info!(
            validator = ?self.local,
            view = header.info.view.0,
            version = header.info.version.0,
            "Re-anchoring vertex store at synced commit"
        );
        self.epoch.vertex_store = VertexStore::recover(
            header.info.clone(),
            self.state_computer.clone(),
            self.ledger.clone(),
        );
        self.epoch.vertex_sync = VertexSync::new(&self.config);
        self.epoch.staged.clear();
        self.epoch.pending_votes.prune_below(header.info.view);
        vec![]
    }

    fn transition_epoch(&mut self, update: &LedgerUpdate, next_set: ValidatorSet) -> Vec<Action> {
        let new_epoch = self.epoch.epoch.next();
        let header = update.proof.header();
        info!(
            validator = ?self.local,
            from_epoch = self.epoch.epoch.0,
            to_epoch = new_epoch.0,
            boundary_view = header.info.view.0,
            version = header.info.version.0,
            validators = next_set.len(),
            "Epoch transition"
        );

        let anchor = ExecutedVertex::anchor(new_epoch, header.info.version, header.info.accumulator);
        let validator_set = Arc::new(next_set);
        self.safety.start_epoch(new_epoch);
        let election = WeightedRoundRobin::new(&validator_set);
        let vertex_store = VertexStore::new(
            anchor,
            self.state_computer.clone(),
            self.ledger.clone(),
        );
        let pacemaker = Pacemaker::new(
            new_epoch,
            self.local,
            validator_set.clone(),
            &self.config,
            vertex_store.high_qc().clone(),
        );
        self.epoch = EpochState {
            epoch: new_epoch,
            validator_set,
            election,
            pacemaker,
            vertex_store,
            vertex_sync: VertexSync::new(&self.config),
            pending_votes: PendingVotes::new(),
            pending_vote_verifications: HashSet::new(),
            pending_qc_verifications: HashMap::new(),
            staged: IndexMap::new(),
            last_proposed_view: View::GENESIS,
        };

        let mut actions = vec![Action::PersistSafetyState {
            state: self.safety.state().clone(),
        }];
        actions.extend(self.enter_view_actions());
        actions
    }
}
