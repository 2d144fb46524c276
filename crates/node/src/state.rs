//! Node state machine.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use triad_bft::{BftConfig, EpochManager, PacemakerStatus};
use triad_core::{
    Action, Event, Ledger, MempoolSource, StateComputer, StateMachine, TimerId,
};
use triad_sync::{LedgerSyncConfig, LedgerSyncService, LedgerSyncStatus};
use triad_types::{EpochId, KeyPair, SafetyState, ValidatorId, ValidatorSet, View};

/// Combined validator state machine.
///
/// Composes the epoch manager (pacemaker, vertex store, proposer election,
/// vertex sync, safety rules) and the ledger sync service into one state
/// machine. Every event enters through [`StateMachine::handle`], whose match
/// is the node's complete dispatch table, built once here rather than
/// discovered at runtime.
pub struct NodeStateMachine {
    /// This validator's identity.
    local: ValidatorId,

    /// The consensus engine for the current epoch.
    epoch: EpochManager,

    /// Ledger-level catch-up, running alongside consensus.
    sync: LedgerSyncService,

    /// Current time, supplied by the runner.
    now: Duration,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("local", &self.local)
            .field("epoch", &self.epoch.epoch())
            .field("view", &self.epoch.current_view())
            .field("now", &self.now)
            .finish()
    }
}

impl NodeStateMachine {
    /// Build a node from the committed ledger state.
    ///
    /// `validator_set` is the committee for the epoch the ledger's latest
    /// proof belongs to. `recovered_safety` is the durable safety record
    /// from a previous run, if any; passing it back is what stops a
    /// restarted node from re-voting views it already signed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: ValidatorId,
        signing_key: KeyPair,
        validator_set: ValidatorSet,
        bft_config: BftConfig,
        sync_config: LedgerSyncConfig,
        state_computer: Arc<dyn StateComputer>,
        ledger: Arc<dyn Ledger>,
        mempool: Arc<dyn MempoolSource>,
        recovered_safety: Option<SafetyState>,
    ) -> Self {
        let epoch = EpochManager::new(
            local,
            signing_key,
            validator_set,
            bft_config,
            state_computer.clone(),
            ledger.clone(),
            mempool,
            recovered_safety,
        );
        let sync = LedgerSyncService::new(
            local,
            epoch.validator_set(),
            state_computer,
            ledger,
            sync_config,
        );
        Self {
            local,
            epoch,
            sync,
            now: Duration::ZERO,
        }
    }

    /// This validator's identity.
    pub fn local(&self) -> ValidatorId {
        self.local
    }

    /// Current epoch.
    pub fn epoch(&self) -> EpochId {
        self.epoch.epoch()
    }

    /// Current pacemaker view.
    pub fn current_view(&self) -> View {
        self.epoch.current_view()
    }

    /// The consensus engine, for status and tests.
    pub fn consensus(&self) -> &EpochManager {
        &self.epoch
    }

    /// Pacemaker status snapshot.
    pub fn pacemaker_status(&self) -> PacemakerStatus {
        self.epoch.pacemaker_status()
    }

    /// Ledger sync status snapshot.
    pub fn ledger_sync_status(&self) -> LedgerSyncStatus {
        self.sync.status()
    }

    /// Kick off the node: arm the pacemaker and the sync check, and propose
    /// if we lead the opening view.
    pub fn start(&mut self) -> Vec<Action> {
        let mut actions = self.epoch.start();
        actions.extend(self.sync.start());
        actions
    }

    /// A commit landed on the ledger, via the live path or the sync path.
    /// Crossing an epoch boundary rebuilds the consensus engine's epoch and
    /// re-points the sync service at the new validator set.
    fn on_ledger_committed(&mut self, update: triad_types::LedgerUpdate) -> Vec<Action> {
        let before = self.epoch.epoch();
        let mut actions = self.epoch.on_ledger_committed(&update);
        if self.epoch.epoch() != before {
            debug!(
                validator = ?self.local,
                epoch = self.epoch.epoch().0,
                "Re-pointing ledger sync at the new validator set"
            );
            actions.extend(self.sync.start_epoch(self.epoch.validator_set()));
        }
        actions.extend(self.sync.on_ledger_committed(&update));
        actions
    }

    /// The epoch a BFT message claims to belong to, for the variants that
    /// carry one.
    fn message_epoch(event: &Event) -> Option<EpochId> {
        match event {
            Event::ProposalReceived { proposal } => Some(proposal.epoch()),
            Event::VoteReceived { vote } => Some(vote.epoch()),
            Event::TimeoutVoteReceived { vote } => Some(vote.epoch),
            Event::TimeoutCertificateReceived { certificate } => Some(certificate.epoch),
            _ => None,
        }
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        // A consensus message from a future epoch means the network crossed
        // a boundary this node has not committed yet. The epoch manager
        // drops the message (it cannot verify it); the committed boundary is
        // learned through ledger sync, so pull the next check forward
        // instead of waiting out the interval.
        let epoch_ahead = Self::message_epoch(&event)
            .is_some_and(|epoch| epoch > self.epoch.epoch());

        let mut actions = match event {
            // ─── Timers ───
            Event::PacemakerTimeout { view } => self.epoch.on_pacemaker_timeout(view),
            Event::VertexRequestTimeout { vertex_hash } => {
                self.epoch.on_vertex_request_timeout(vertex_hash)
            }
            Event::LedgerSyncTick => self.sync.on_tick(),
            Event::LedgerSyncStatusDeadline => self.sync.on_status_deadline(),
            Event::LedgerSyncRequestTimeout => self.sync.on_request_timeout(),

            // ─── BFT core messages ───
            Event::ProposalReceived { proposal } => self.epoch.on_proposal(proposal),
            Event::VoteReceived { vote } => self.epoch.on_vote(vote),
            Event::TimeoutVoteReceived { vote } => self.epoch.on_timeout_vote(vote),
            Event::TimeoutCertificateReceived { certificate } => {
                self.epoch.on_timeout_certificate(certificate)
            }

            // ─── Vertex sync messages ───
            Event::VertexRequestReceived {
                from,
                vertex_hash,
                count,
            } => self.epoch.on_vertex_request(from, vertex_hash, count),
            Event::VertexResponseReceived { from, vertices } => {
                self.epoch.on_vertex_response(from, vertices)
            }
            Event::VertexErrorResponseReceived {
                from, vertex_hash, ..
            } => self.epoch.on_vertex_error_response(from, vertex_hash),

            // ─── Ledger sync messages ───
            Event::StatusRequestReceived { from } => self.sync.on_status_request(from),
            Event::StatusResponseReceived { from, proof } => {
                self.sync.on_status_response(from, proof)
            }
            Event::SyncRequestReceived { from, from_version } => {
                self.sync.on_sync_request(from, from_version)
            }
            Event::SyncResponseReceived { from, update } => {
                self.sync.on_sync_response(from, update)
            }

            // ─── Internal consequences ───
            Event::QuorumFormed { qc } => self.epoch.on_quorum_formed(qc),
            Event::TimeoutQuorumFormed { certificate } => {
                self.epoch.on_timeout_quorum_formed(certificate)
            }
            Event::LedgerCommitted { update } => self.on_ledger_committed(update),

            // ─── Delegated-work callbacks ───
            Event::VoteSignatureVerified { vote, valid } => {
                self.epoch.on_vote_verified(vote, valid)
            }
            Event::TimeoutVoteSignatureVerified { vote, valid } => {
                self.epoch.on_timeout_vote_verified(vote, valid)
            }
            Event::QcVerified { vertex_hash, valid } => {
                self.epoch.on_qc_verified(vertex_hash, valid)
            }
        };
        if epoch_ahead {
            debug!(
                validator = ?self.local,
                epoch = self.epoch.epoch().0,
                "Message from a future epoch, pulling the sync check forward"
            );
            actions.push(Action::SetTimer {
                id: TimerId::LedgerSyncCheck,
                duration: Duration::ZERO,
            });
        }
        actions
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.epoch.set_time(now);
        self.sync.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use triad_core::{
        InMemoryLedger, InMemoryMempool, InMemorySafetyStore, InMemoryStateComputer,
        OutboundMessage, SafetyStore, TimerId,
    };
    use triad_types::{
        EpochId, ExecutedVertex, Hash, LedgerProof, StateVersion, Transaction, ValidatorInfo,
    };

    fn make_keys(n: usize) -> Vec<KeyPair> {
        (0..n).map(|i| KeyPair::from_seed(&[i as u8 + 1; 32])).collect()
    }

    fn make_set(keys: &[KeyPair]) -> ValidatorSet {
        ValidatorSet::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| ValidatorInfo {
                    validator_id: ValidatorId(i as u64),
                    public_key: k.public_key(),
                    voting_power: 1,
                })
                .collect(),
        )
    }

    fn make_node(index: usize, keys: &[KeyPair]) -> NodeStateMachine {
        let anchor = ExecutedVertex::anchor(EpochId(0), StateVersion(0), Hash::ZERO);
        let ledger = Arc::new(InMemoryLedger::new(LedgerProof::anchor(
            anchor.ledger_header(),
        )));
        let mempool = Arc::new(InMemoryMempool::new());
        mempool.add(Transaction::new(vec![index as u8]));
        NodeStateMachine::new(
            ValidatorId(index as u64),
            keys[index].clone(),
            make_set(keys),
            BftConfig::default(),
            LedgerSyncConfig::default(),
            Arc::new(InMemoryStateComputer::new()),
            ledger,
            mempool,
            None,
        )
    }

    #[traced_test]
    #[test]
    fn test_start_arms_pacemaker_and_sync_check() {
        let keys = make_keys(4);
        // Validator 0 does not lead view 1, so start is timers only.
        let mut node = make_node(0, &keys);
        let actions = node.start();
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::SetTimer {
                id: TimerId::Pacemaker,
                ..
            }
        )));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::SetTimer {
                id: TimerId::LedgerSyncCheck,
                ..
            }
        )));
        assert!(!actions.iter().any(Action::is_network));
    }

    #[traced_test]
    #[test]
    fn test_opening_leader_proposes_once() {
        let keys = make_keys(4);
        // View 1's leader under weighted round robin with equal powers.
        let mut node = make_node(1, &keys);
        let actions = node.start();
        let proposals = actions
            .iter()
            .filter(|a| {
                matches!(
                    a,
                    Action::Broadcast {
                        message: OutboundMessage::Proposal(_)
                    }
                )
            })
            .count();
        assert_eq!(proposals, 1);
    }

    #[traced_test]
    #[test]
    fn test_vote_is_persisted_before_broadcast() {
        let keys = make_keys(4);
        let mut leader = make_node(1, &keys);
        let start_actions = leader.start();
        let proposal = start_actions
            .iter()
            .find_map(|a| match a {
                Action::Broadcast {
                    message: OutboundMessage::Proposal(gossip),
                } => Some(gossip.proposal.clone()),
                _ => None,
            })
            .expect("leader proposed");

        let mut follower = make_node(0, &keys);
        follower.start();
        let actions = follower.handle(Event::ProposalReceived { proposal });

        let persist = actions
            .iter()
            .position(|a| matches!(a, Action::PersistSafetyState { .. }))
            .expect("vote persists safety state");
        let broadcast = actions
            .iter()
            .position(|a| {
                matches!(
                    a,
                    Action::Broadcast {
                        message: OutboundMessage::Vote(_)
                    }
                )
            })
            .expect("vote broadcast");
        assert!(
            persist < broadcast,
            "safety record must be durable before the vote leaves the node"
        );

        // The runner contract: executing the persist action stores the
        // record that refuses a second vote for the view.
        let store = InMemorySafetyStore::new();
        for action in &actions {
            if let Action::PersistSafetyState { state } = action {
                store.persist(state).unwrap();
            }
        }
        assert_eq!(store.load().unwrap().last_voted_view, View(1));
    }

    #[traced_test]
    #[test]
    fn test_sync_messages_route_to_sync_service() {
        let keys = make_keys(4);
        let mut node = make_node(0, &keys);
        node.start();

        let actions = node.handle(Event::StatusRequestReceived {
            from: ValidatorId(2),
        });
        match &actions[0] {
            Action::SendTo {
                peer,
                message: OutboundMessage::StatusResponse(response),
            } => {
                assert_eq!(*peer, ValidatorId(2));
                assert_eq!(response.proof.version(), StateVersion(0));
            }
            other => panic!("expected status response, got {:?}", other),
        }
    }

    #[traced_test]
    #[test]
    fn test_future_epoch_message_pulls_sync_check_forward() {
        let keys = make_keys(4);
        let mut node = make_node(0, &keys);
        node.start();

        let tc = triad_types::TimeoutCertificate {
            epoch: EpochId(2),
            view: View(1),
            high_qc: node.consensus().vertex_store().high_qc().clone(),
            aggregated_signature: triad_types::Signature::empty(),
            signers: triad_types::SignerBitfield::empty(),
        };
        let actions = node.handle(Event::TimeoutCertificateReceived { certificate: tc });
        assert!(
            actions.iter().any(|a| matches!(
                a,
                Action::SetTimer {
                    id: TimerId::LedgerSyncCheck,
                    duration,
                } if *duration == Duration::ZERO
            )),
            "a future-epoch message must pull the sync check forward"
        );

        // Messages from the node's own epoch do not.
        let actions = node.handle(Event::PacemakerTimeout { view: View(99) });
        assert!(actions.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_stale_pacemaker_timeout_is_ignored() {
        let keys = make_keys(4);
        let mut node = make_node(0, &keys);
        node.start();
        // The node is at view 1; a fire for view 0 belongs to a superseded
        // timer and must not produce a timeout vote.
        let actions = node.handle(Event::PacemakerTimeout { view: View(0) });
        assert!(actions.is_empty());
    }
}
