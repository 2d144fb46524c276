//! The ledger sync service state machine.

use crate::LedgerSyncConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use triad_core::{Action, Event, Ledger, LedgerError, OutboundMessage, StateComputer, TimerId};
use triad_messages::{StatusResponse, SyncRequest, SyncResponse};
use triad_types::{LedgerProof, LedgerUpdate, StateVersion, ValidatorId, ValidatorSet};

/// The sync protocol's high-level state, for external observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhaseKind {
    /// Not syncing; periodic checks keep probing.
    Idle,
    /// A status probe is out; responses are being collected.
    AwaitingStatus,
    /// Pulling committed batches from a chosen peer.
    Syncing,
}

/// Snapshot of the sync service for status APIs.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSyncStatus {
    /// Current phase.
    pub phase: SyncPhaseKind,
    /// Local committed ledger version.
    pub current_version: u64,
    /// Version being synced toward, when syncing.
    pub target_version: Option<u64>,
    /// Versions behind the target, when syncing.
    pub behind: u64,
    /// Requests sent in the current sync round.
    pub attempts: u32,
    /// Rounds abandoned after exhausting every responder.
    pub stalled_rounds: u64,
}

/// Internal phase data.
enum Phase {
    Idle,
    AwaitingStatus {
        /// Best verified proof seen per responder.
        responses: Vec<(ValidatorId, LedgerProof)>,
    },
    Syncing {
        /// The proven version being synced toward.
        target: StateVersion,
        /// Peer the outstanding request went to.
        peer: ValidatorId,
        /// Requests sent this round, the outstanding one included.
        attempts: u32,
        /// Remaining responders, best first, for retries.
        fallbacks: Vec<(ValidatorId, StateVersion)>,
    },
}

/// Keeps the committed ledger caught up with the network.
///
/// `Idle → AwaitingStatus → Syncing → Idle`: a periodic tick broadcasts a
/// status probe, responses are collected for a window, the highest proven
/// version wins, and batches are pulled from that responder until the local
/// ledger reaches it. Response timeouts rotate to the next-best responder
/// with bounded attempts; exhaustion is an observable stall, not a crash.
///
/// The service also answers peers' status and sync requests from the shared
/// ledger.
pub struct LedgerSyncService {
    local: ValidatorId,
    validator_set: Arc<ValidatorSet>,
    state_computer: Arc<dyn StateComputer>,
    ledger: Arc<dyn Ledger>,
    config: LedgerSyncConfig,
    phase: Phase,
    stalled_rounds: u64,
    now: Duration,
}

impl LedgerSyncService {
    /// Build the service around the shared ledger.
    pub fn new(
        local: ValidatorId,
        validator_set: Arc<ValidatorSet>,
        state_computer: Arc<dyn StateComputer>,
        ledger: Arc<dyn Ledger>,
        config: LedgerSyncConfig,
    ) -> Self {
        Self {
            local,
            validator_set,
            state_computer,
            ledger,
            config,
            phase: Phase::Idle,
            stalled_rounds: 0,
            now: Duration::ZERO,
        }
    }

    /// Set the current time. Called by the node before every event.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Arm the periodic check.
    pub fn start(&self) -> Vec<Action> {
        vec![Action::SetTimer {
            id: TimerId::LedgerSyncCheck,
            duration: self.config.check_interval,
        }]
    }

    /// Status snapshot.
    pub fn status(&self) -> LedgerSyncStatus {
        let current = self.ledger.version();
        let (phase, target, attempts) = match &self.phase {
            Phase::Idle => (SyncPhaseKind::Idle, None, 0),
            Phase::AwaitingStatus { .. } => (SyncPhaseKind::AwaitingStatus, None, 0),
            Phase::Syncing {
                target, attempts, ..
            } => (SyncPhaseKind::Syncing, Some(target.0), *attempts),
        };
        LedgerSyncStatus {
            phase,
            current_version: current.0,
            target_version: target,
            behind: target.map(|t| t.saturating_sub(current.0)).unwrap_or(0),
            attempts,
            stalled_rounds: self.stalled_rounds,
        }
    }

    /// Swap in a new epoch's validator set. Aborts any round in flight:
    /// collected proofs were verified against the old set.
    pub fn start_epoch(&mut self, validator_set: Arc<ValidatorSet>) -> Vec<Action> {
        self.validator_set = validator_set;
        let actions = match &self.phase {
            Phase::Idle => vec![],
            Phase::AwaitingStatus { .. } => vec![Action::CancelTimer {
                id: TimerId::LedgerSyncStatus,
            }],
            Phase::Syncing { .. } => vec![Action::CancelTimer {
                id: TimerId::LedgerSyncRequest,
            }],
        };
        self.phase = Phase::Idle;
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local triggers
    // ═══════════════════════════════════════════════════════════════════════

    /// Periodic health check: when idle, probe peers for their latest
    /// proofs.
    pub fn on_tick(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::SetTimer {
            id: TimerId::LedgerSyncCheck,
            duration: self.config.check_interval,
        }];
        if !matches!(self.phase, Phase::Idle) {
            trace!(validator = ?self.local, "Sync round already in flight, skipping probe");
            return actions;
        }
        debug!(
            validator = ?self.local,
            version = self.ledger.version().0,
            "Probing peers for ledger status"
        );
        self.phase = Phase::AwaitingStatus {
            responses: Vec::new(),
        };
        actions.push(Action::Broadcast {
            message: OutboundMessage::StatusRequest(triad_messages::StatusRequest),
        });
        actions.push(Action::SetTimer {
            id: TimerId::LedgerSyncStatus,
            duration: self.config.status_window,
        });
        actions
    }

    /// The status-collection window closed: pick the best proven source and
    /// start pulling, or go back to idle if nobody is ahead of us.
    pub fn on_status_deadline(&mut self) -> Vec<Action> {
        let responses = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::AwaitingStatus { responses } => responses,
            other => {
                // A stale deadline must not disturb whatever is running.
                self.phase = other;
                trace!("Stale status deadline");
                return vec![];
            }
        };
        let current = self.ledger.version();
        let mut candidates: Vec<(ValidatorId, StateVersion)> = responses
            .iter()
            .filter(|(_, proof)| proof.version() > current)
            .map(|(peer, proof)| (*peer, proof.version()))
            .collect();
        if candidates.is_empty() {
            debug!(
                validator = ?self.local,
                version = current.0,
                "Ledger up to date with every responder"
            );
            return vec![];
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        let (peer, target) = candidates.remove(0);
        info!(
            validator = ?self.local,
            from = current.0,
            target = target.0,
            peer = ?peer,
            "Ledger behind, starting sync"
        );
        self.phase = Phase::Syncing {
            target,
            peer,
            attempts: 1,
            fallbacks: candidates,
        };
        self.request_from(peer)
    }

    /// The patience window for a sync request elapsed: retry against the
    /// next-best responder, bounded.
    pub fn on_request_timeout(&mut self) -> Vec<Action> {
        let Phase::Syncing { peer, .. } = &self.phase else {
            trace!("Stale sync request timeout");
            return vec![];
        };
        debug!(peer = ?*peer, "Sync request timed out");
        self.retry_or_stall()
    }

    /// A commit landed through the live BFT path; it may have covered the
    /// remaining gap.
    pub fn on_ledger_committed(&mut self, _update: &LedgerUpdate) -> Vec<Action> {
        let Phase::Syncing { target, .. } = &self.phase else {
            return vec![];
        };
        if self.ledger.version() < *target {
            return vec![];
        }
        info!(
            validator = ?self.local,
            version = self.ledger.version().0,
            "Live commits caught the ledger up, ending sync round"
        );
        self.phase = Phase::Idle;
        vec![Action::CancelTimer {
            id: TimerId::LedgerSyncRequest,
        }]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Requester side
    // ═══════════════════════════════════════════════════════════════════════

    /// A peer reported its latest proof. Collected only during the status
    /// window, and only after the proof verifies against the validator set
    /// (quorum arithmetic plus the aggregated signature): an unverified
    /// claim never becomes a sync target.
    pub fn on_status_response(&mut self, from: ValidatorId, proof: LedgerProof) -> Vec<Action> {
        let current = self.ledger.version();
        let Phase::AwaitingStatus { responses } = &mut self.phase else {
            trace!(from = ?from, "Status response outside collection window");
            return vec![];
        };
        if proof.version() <= current {
            trace!(from = ?from, version = proof.version().0, "Responder not ahead of us");
            return vec![];
        }
        if let Err(e) = proof.verify(&self.validator_set) {
            warn!(from = ?from, error = %e, "Status response carries an invalid proof");
            return vec![];
        }
        match responses.iter_mut().find(|(peer, _)| *peer == from) {
            Some(entry) => {
                if proof.version() > entry.1.version() {
                    entry.1 = proof;
                }
            }
            None => responses.push((from, proof)),
        }
        vec![]
    }

    /// A peer answered our sync request with a batch and its proof.
    pub fn on_sync_response(&mut self, from: ValidatorId, update: LedgerUpdate) -> Vec<Action> {
        let Phase::Syncing { peer, target, .. } = &self.phase else {
            trace!(from = ?from, "Unsolicited sync response");
            return vec![];
        };
        if from != *peer {
            trace!(from = ?from, expected = ?*peer, "Sync response from a superseded peer");
            return vec![];
        }
        let target = *target;

        if let Err(e) = update.proof.verify(&self.validator_set) {
            warn!(from = ?from, error = %e, "Sync response proof invalid; retrying elsewhere");
            return self.retry_or_stall();
        }

        match self.ledger.try_commit(&update) {
            Ok(()) => {
                self.state_computer.commit(&update);
                info!(
                    validator = ?self.local,
                    version = update.version().0,
                    transactions = update.batch.len(),
                    "Applied synced batch"
                );
                let mut actions = vec![
                    Action::EmitLedgerUpdate {
                        update: update.clone(),
                    },
                    Action::EnqueueInternal {
                        event: Event::LedgerCommitted { update },
                    },
                ];
                actions.extend(self.continue_or_finish(target));
                actions
            }
            Err(LedgerError::NonContiguous { current, got }) => {
                // The live path (or an earlier response) got there first.
                // Strictly-ascending application is exactly what keeps the
                // two paths from double-applying.
                debug!(
                    current = current.0,
                    got = got.0,
                    "Dropping non-extending synced batch"
                );
                if self.ledger.version() >= target {
                    return self.continue_or_finish(target);
                }
                // Not progress: charge the retry budget so a peer replaying
                // stale batches cannot keep the round alive forever.
                self.retry_or_stall()
            }
            Err(e @ LedgerError::LengthMismatch { .. }) => {
                warn!(from = ?from, error = %e, "Malformed sync batch; retrying elsewhere");
                self.retry_or_stall()
            }
        }
    }

    /// Keep pulling from the current peer until the target is reached.
    fn continue_or_finish(&mut self, target: StateVersion) -> Vec<Action> {
        let current = self.ledger.version();
        if current >= target {
            info!(
                validator = ?self.local,
                version = current.0,
                "Ledger sync round complete"
            );
            self.phase = Phase::Idle;
            return vec![Action::CancelTimer {
                id: TimerId::LedgerSyncRequest,
            }];
        }
        let Phase::Syncing { peer, attempts, .. } = &mut self.phase else {
            return vec![];
        };
        // Progress was made; the round's retry budget starts over.
        *attempts = 1;
        let peer = *peer;
        self.request_from(peer)
    }

    /// Rotate to the next-best responder, or abandon the round as stalled.
    fn retry_or_stall(&mut self) -> Vec<Action> {
        let Phase::Syncing {
            peer,
            attempts,
            fallbacks,
            target,
        } = &mut self.phase
        else {
            return vec![];
        };
        if *attempts >= self.config.max_attempts {
            warn!(
                validator = ?self.local,
                target = target.0,
                attempts = *attempts,
                "Ledger sync stalled: every responder exhausted"
            );
            self.stalled_rounds += 1;
            self.phase = Phase::Idle;
            return vec![Action::CancelTimer {
                id: TimerId::LedgerSyncRequest,
            }];
        }
        *attempts += 1;
        if let Some((next, _)) = fallbacks.first().copied() {
            fallbacks.remove(0);
            *peer = next;
        }
        let peer = *peer;
        debug!(peer = ?peer, "Retrying sync request");
        self.request_from(peer)
    }

    fn request_from(&self, peer: ValidatorId) -> Vec<Action> {
        vec![
            Action::SendTo {
                peer,
                message: OutboundMessage::SyncRequest(SyncRequest::new(self.ledger.version())),
            },
            Action::SetTimer {
                id: TimerId::LedgerSyncRequest,
                duration: self.config.request_timeout,
            },
        ]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Responder side
    // ═══════════════════════════════════════════════════════════════════════

    /// Serve a peer's status probe with our latest proof.
    pub fn on_status_request(&self, from: ValidatorId) -> Vec<Action> {
        vec![Action::SendTo {
            peer: from,
            message: OutboundMessage::StatusResponse(StatusResponse {
                proof: self.ledger.latest_proof(),
            }),
        }]
    }

    /// Serve a peer's pull for committed transactions after a version.
    pub fn on_sync_request(&self, from: ValidatorId, from_version: StateVersion) -> Vec<Action> {
        match self
            .ledger
            .batch(from_version, self.config.max_transactions_per_response)
        {
            Some(update) => vec![Action::SendTo {
                peer: from,
                message: OutboundMessage::SyncResponse(SyncResponse { update }),
            }],
            None => {
                debug!(
                    from = ?from,
                    from_version = from_version.0,
                    "Nothing to serve for sync request"
                );
                vec![]
            }
        }
    }
}
