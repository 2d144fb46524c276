//! Deterministic simulation runner.
//!
//! One global event queue drives every node. The runner executes all
//! actions itself: network actions go through the simulated network,
//! timers become queue entries, delegated signature verification runs
//! inline (instant and deterministic), and safety-state persistence goes to
//! a per-node in-memory store honoring the persist-before-send contract.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::NodeIndex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use triad_bft::BftConfig;
use triad_core::{
    Action, Event, InMemoryLedger, InMemoryMempool, InMemorySafetyStore, InMemoryStateComputer,
    Ledger, OutboundMessage, SafetyStore, StateMachine, TimerId,
};
use triad_node::NodeStateMachine;
use triad_sync::LedgerSyncConfig;
use triad_types::{
    EpochId, ExecutedVertex, Hash, KeyPair, LedgerProof, LedgerUpdate, PublicKey, StateVersion,
    Transaction, ValidatorId, ValidatorInfo, ValidatorSet, View,
};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Network shape and fault model.
    pub network: NetworkConfig,
    /// Consensus engine tunables, shared by every node.
    pub bft: BftConfig,
    /// Ledger sync tunables, shared by every node.
    pub ledger_sync: LedgerSyncConfig,
    /// When set, the state computer ends the epoch at the first committed
    /// vertex at or above this view, handing the same committee to the next
    /// epoch.
    pub epoch_ceiling: Option<View>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            bft: BftConfig::default(),
            ledger_sync: LedgerSyncConfig::default(),
            epoch_ceiling: None,
        }
    }
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Events processed per priority class (internal, timer, network).
    pub events_by_priority: [u64; 3],
    /// Total actions generated by nodes.
    pub actions_generated: u64,
    /// Messages scheduled for delivery.
    pub messages_sent: u64,
    /// Messages dropped by partitions.
    pub messages_dropped_partition: u64,
    /// Messages dropped by packet loss.
    pub messages_dropped_loss: u64,
    /// Outbound messages counted per message type name.
    pub messages_by_type: HashMap<&'static str, u64>,
    /// Timers armed.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
}

impl SimulationStats {
    /// Total messages dropped.
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss
    }

    /// How many messages of a given type were emitted.
    pub fn sent_of_type(&self, type_name: &str) -> u64 {
        self.messages_by_type.get(type_name).copied().unwrap_or(0)
    }
}

/// Deterministic multi-node simulation.
///
/// Given the same seed and the same schedule of fault injections, a run
/// produces identical results: one queue, one seeded RNG, inline delegated
/// work.
pub struct SimulationRunner {
    nodes: Vec<NodeStateMachine>,
    keys: Vec<KeyPair>,
    validator_set: ValidatorSet,
    config: SimulationConfig,

    /// Global event queue, deterministically ordered.
    event_queue: BTreeMap<EventKey, Event>,
    /// Insertion counter for the queue's final tiebreak.
    sequence: u64,
    /// Current simulation time.
    now: Duration,

    network: SimulatedNetwork,
    rng: ChaCha8Rng,

    /// Armed timers, for cancellation and supersession.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    stats: SimulationStats,

    // Per-node collaborators; index is the node index.
    ledgers: Vec<Arc<InMemoryLedger>>,
    computers: Vec<Arc<InMemoryStateComputer>>,
    mempools: Vec<Arc<InMemoryMempool>>,
    safety_stores: Vec<Arc<InMemorySafetyStore>>,

    /// Ledger updates each node emitted, in emission order.
    ledger_updates: Vec<Vec<LedgerUpdate>>,
}

impl SimulationRunner {
    /// Create a runner with `config.network.num_validators` equal-power
    /// validators, all anchored at the same genesis.
    pub fn new(config: SimulationConfig, seed: u64) -> Self {
        let num_nodes = config.network.num_validators;
        let network = SimulatedNetwork::new(config.network.clone());
        let rng = ChaCha8Rng::seed_from_u64(seed);

        let keys: Vec<KeyPair> = (0..num_nodes)
            .map(|i| {
                let mut seed_bytes = [0u8; 32];
                let key_seed = seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95);
                seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
                seed_bytes[8..16].copy_from_slice(&(i as u64 + 1).to_le_bytes());
                KeyPair::from_seed(&seed_bytes)
            })
            .collect();
        let validator_set = ValidatorSet::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| ValidatorInfo {
                    validator_id: ValidatorId(i as u64),
                    public_key: k.public_key(),
                    voting_power: 1,
                })
                .collect(),
        );

        let mut runner = Self {
            nodes: Vec::new(),
            keys,
            validator_set,
            config,
            event_queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network,
            rng,
            timers: HashMap::new(),
            stats: SimulationStats::default(),
            ledgers: Vec::new(),
            computers: Vec::new(),
            mempools: Vec::new(),
            safety_stores: Vec::new(),
            ledger_updates: Vec::new(),
        };
        for index in 0..num_nodes {
            runner.ledgers.push(Arc::new(InMemoryLedger::new(
                LedgerProof::anchor(Self::genesis_anchor().ledger_header()),
            )));
            let computer = Arc::new(runner.make_computer());
            runner.computers.push(computer);
            runner.mempools.push(Arc::new(InMemoryMempool::new()));
            runner.safety_stores.push(Arc::new(InMemorySafetyStore::new()));
            runner.ledger_updates.push(Vec::new());
            let node = runner.make_node(index, None);
            runner.nodes.push(node);
        }
        info!(num_nodes, seed, "Created simulation runner");
        runner
    }

    fn genesis_anchor() -> ExecutedVertex {
        ExecutedVertex::anchor(EpochId::GENESIS, StateVersion(0), Hash::ZERO)
    }

    fn make_computer(&self) -> InMemoryStateComputer {
        match self.config.epoch_ceiling {
            Some(ceiling) => {
                InMemoryStateComputer::with_epoch_ceiling(ceiling, self.validator_set.clone())
            }
            None => InMemoryStateComputer::new(),
        }
    }

    fn make_node(
        &self,
        index: NodeIndex,
        recovered: Option<triad_types::SafetyState>,
    ) -> NodeStateMachine {
        NodeStateMachine::new(
            ValidatorId(index as u64),
            self.keys[index as usize].clone(),
            self.validator_set.clone(),
            self.config.bft.clone(),
            self.config.ledger_sync.clone(),
            self.computers[index as usize].clone(),
            self.ledgers[index as usize].clone(),
            self.mempools[index as usize].clone(),
            recovered,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════════

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Run statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// A node by index.
    pub fn node(&self, index: NodeIndex) -> &NodeStateMachine {
        &self.nodes[index as usize]
    }

    /// The network, for partition and loss injection.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// A node's committed ledger version.
    pub fn committed_version(&self, index: NodeIndex) -> StateVersion {
        self.ledgers[index as usize].version()
    }

    /// A node's committed transaction log.
    pub fn committed_transactions(&self, index: NodeIndex) -> Vec<Transaction> {
        self.ledgers[index as usize].committed_transactions()
    }

    /// The ledger updates a node emitted, in order.
    pub fn ledger_updates(&self, index: NodeIndex) -> &[LedgerUpdate] {
        &self.ledger_updates[index as usize]
    }

    /// Total nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// A node's safety store, for fault injection.
    pub fn safety_store(&self, index: NodeIndex) -> &Arc<InMemorySafetyStore> {
        &self.safety_stores[index as usize]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Driving
    // ═══════════════════════════════════════════════════════════════════════

    /// Start every node: arm pacemakers and sync checks, propose where led.
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() as NodeIndex {
            self.nodes[index as usize].set_time(self.now);
            let actions = self.nodes[index as usize].start();
            self.process_actions(index, actions);
        }
    }

    /// Add a candidate transaction to one node's mempool.
    pub fn submit_transaction(&mut self, index: NodeIndex, tx: Transaction) {
        self.mempools[index as usize].add(tx);
    }

    /// Add a candidate transaction to every node's mempool (as a gossiped
    /// mempool would).
    pub fn submit_everywhere(&mut self, tx: Transaction) {
        for mempool in &self.mempools {
            mempool.add(tx.clone());
        }
    }

    /// Tear a node down and bring it back with the same durable state
    /// (ledger, safety record): a crash/restart. In-flight messages keep
    /// their delivery schedule; the old instance's timers are discarded.
    pub fn restart_node(&mut self, index: NodeIndex) {
        let stale: Vec<EventKey> = self
            .timers
            .iter()
            .filter(|((node, _), _)| *node == index)
            .map(|(_, key)| *key)
            .collect();
        for key in stale {
            self.event_queue.remove(&key);
        }
        self.timers.retain(|(node, _), _| *node != index);

        let recovered = self.safety_stores[index as usize].load();
        info!(
            node = index,
            version = self.ledgers[index as usize].version().0,
            recovered_safety = recovered.is_some(),
            "Restarting node"
        );
        let mut node = self.make_node(index, recovered);
        node.set_time(self.now);
        let actions = node.start();
        self.nodes[index as usize] = node;
        self.process_actions(index, actions);
    }

    /// Run until the queue drains past `end_time`.
    pub fn run_until(&mut self, end_time: Duration) {
        while let Some((&key, _)) = self.event_queue.first_key_value() {
            if key.time > end_time {
                break;
            }
            let (key, event) = self.event_queue.pop_first().expect("checked non-empty");
            self.now = key.time;

            // Fired timers leave the registry.
            if let Some(id) = Self::event_timer_id(&event) {
                if self.timers.get(&(key.node, id)) == Some(&key) {
                    self.timers.remove(&(key.node, id));
                }
            }

            self.stats.events_processed += 1;
            self.stats.events_by_priority[event.priority() as usize] += 1;

            trace!(time = ?self.now, node = key.node, event = event.type_name(), "Processing");
            let node = &mut self.nodes[key.node as usize];
            node.set_time(self.now);
            let actions = node.handle(event);
            self.process_actions(key.node, actions);
        }
        self.now = self.now.max(end_time);
    }

    /// Run another `duration` of simulated time.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        self.run_until(end);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Action execution
    // ═══════════════════════════════════════════════════════════════════════

    /// Execute a node's action batch in order. A failed safety-state
    /// persist drops the remainder of the batch: no signed message leaves
    /// the node without its durable record.
    fn process_actions(&mut self, from: NodeIndex, actions: Vec<Action>) {
        self.stats.actions_generated += actions.len() as u64;
        for action in actions {
            if let Action::PersistSafetyState { state } = &action {
                if let Err(e) = self.safety_stores[from as usize].persist(state) {
                    warn!(
                        node = from,
                        error = %e,
                        "Safety persist failed; dropping the rest of the action batch"
                    );
                    return;
                }
                continue;
            }
            self.process_action(from, action);
        }
    }

    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::Broadcast { message } => {
                *self
                    .stats
                    .messages_by_type
                    .entry(message.type_name())
                    .or_insert(0) += 1;
                for to in self.network.all_nodes() {
                    if to != from {
                        let event = Self::message_to_event(from, message.clone());
                        self.try_deliver(from, to, event);
                    }
                }
            }

            Action::SendTo { peer, message } => {
                *self
                    .stats
                    .messages_by_type
                    .entry(message.type_name())
                    .or_insert(0) += 1;
                let to = peer.0 as NodeIndex;
                let event = Self::message_to_event(from, message);
                self.try_deliver(from, to, event);
            }

            Action::SetTimer { id, duration } => {
                // The fire event is built at arming time, so a pacemaker
                // fire carries the view the timer was armed in.
                let event = self.timer_event(from, id);
                let key = self.schedule(from, self.now + duration, event);
                if let Some(superseded) = self.timers.insert((from, id), key) {
                    self.event_queue.remove(&superseded);
                }
                self.stats.timers_set += 1;
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&key);
                    self.stats.timers_cancelled += 1;
                }
            }

            Action::EnqueueInternal { event } => {
                self.schedule(from, self.now, event);
            }

            // Delegated verification runs inline: instant and deterministic.
            Action::VerifyVoteSignature {
                vote,
                public_key,
                signing_message,
            } => {
                let valid = public_key.verify(&signing_message, &vote.signature);
                self.schedule(from, self.now, Event::VoteSignatureVerified { vote, valid });
            }

            Action::VerifyTimeoutVoteSignature {
                vote,
                public_key,
                signing_message,
            } => {
                let valid = public_key.verify(&signing_message, &vote.signature);
                self.schedule(
                    from,
                    self.now,
                    Event::TimeoutVoteSignatureVerified { vote, valid },
                );
            }

            Action::VerifyQcSignature {
                qc,
                public_keys,
                vertex_hash,
                signing_message,
            } => {
                let valid = match PublicKey::aggregate(&public_keys) {
                    Ok(aggregate) => {
                        aggregate.verify(&signing_message, &qc.aggregated_signature)
                    }
                    Err(_) => false,
                };
                self.schedule(from, self.now, Event::QcVerified { vertex_hash, valid });
            }

            Action::PersistSafetyState { .. } => {
                unreachable!("persist handled in process_actions for batch semantics")
            }

            Action::EmitLedgerUpdate { update } => {
                debug!(
                    node = from,
                    version = update.version().0,
                    transactions = update.batch.len(),
                    "Ledger update emitted"
                );
                self.ledger_updates[from as usize].push(update);
            }
        }
    }

    fn schedule(&mut self, node: NodeIndex, time: Duration, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey::new(time, &event, node, self.sequence);
        self.event_queue.insert(key, event);
        key
    }

    fn try_deliver(&mut self, from: NodeIndex, to: NodeIndex, event: Event) {
        if self.network.is_partitioned(from, to) {
            self.stats.messages_dropped_partition += 1;
            trace!(from, to, "Message dropped by partition");
            return;
        }
        if self.network.should_drop_packet(&mut self.rng) {
            self.stats.messages_dropped_loss += 1;
            trace!(from, to, "Message dropped by packet loss");
            return;
        }
        let latency = self.network.sample_latency(&mut self.rng);
        self.schedule(to, self.now + latency, event);
        self.stats.messages_sent += 1;
    }

    /// Convert an outbound message into the receiver-side event. Sender
    /// identity comes from the runner; production derives it from message
    /// signatures.
    fn message_to_event(from: NodeIndex, message: OutboundMessage) -> Event {
        let from = ValidatorId(from as u64);
        match message {
            OutboundMessage::Proposal(gossip) => Event::ProposalReceived {
                proposal: gossip.proposal,
            },
            OutboundMessage::Vote(gossip) => Event::VoteReceived { vote: gossip.vote },
            OutboundMessage::TimeoutVote(gossip) => {
                Event::TimeoutVoteReceived { vote: gossip.vote }
            }
            OutboundMessage::TimeoutCertificate(gossip) => Event::TimeoutCertificateReceived {
                certificate: gossip.certificate,
            },
            OutboundMessage::VertexRequest(request) => Event::VertexRequestReceived {
                from,
                vertex_hash: request.vertex_hash,
                count: request.count,
            },
            OutboundMessage::VertexResponse(response) => Event::VertexResponseReceived {
                from,
                vertices: response.vertices,
            },
            OutboundMessage::VertexErrorResponse(response) => Event::VertexErrorResponseReceived {
                from,
                vertex_hash: response.vertex_hash,
                high_qc: response.high_qc,
            },
            OutboundMessage::StatusRequest(_) => Event::StatusRequestReceived { from },
            OutboundMessage::StatusResponse(response) => Event::StatusResponseReceived {
                from,
                proof: response.proof,
            },
            OutboundMessage::SyncRequest(request) => Event::SyncRequestReceived {
                from,
                from_version: request.from_version,
            },
            OutboundMessage::SyncResponse(response) => Event::SyncResponseReceived {
                from,
                update: response.update,
            },
        }
    }

    /// The event a timer produces when it fires, captured at arming time.
    fn timer_event(&self, node: NodeIndex, id: TimerId) -> Event {
        match id {
            TimerId::Pacemaker => Event::PacemakerTimeout {
                view: self.nodes[node as usize].current_view(),
            },
            TimerId::VertexRequest(vertex_hash) => Event::VertexRequestTimeout { vertex_hash },
            TimerId::LedgerSyncCheck => Event::LedgerSyncTick,
            TimerId::LedgerSyncStatus => Event::LedgerSyncStatusDeadline,
            TimerId::LedgerSyncRequest => Event::LedgerSyncRequestTimeout,
        }
    }

    /// The timer registry entry a fired event belongs to.
    fn event_timer_id(event: &Event) -> Option<TimerId> {
        match event {
            Event::PacemakerTimeout { .. } => Some(TimerId::Pacemaker),
            Event::VertexRequestTimeout { vertex_hash } => {
                Some(TimerId::VertexRequest(*vertex_hash))
            }
            Event::LedgerSyncTick => Some(TimerId::LedgerSyncCheck),
            Event::LedgerSyncStatusDeadline => Some(TimerId::LedgerSyncStatus),
            Event::LedgerSyncRequestTimeout => Some(TimerId::LedgerSyncRequest),
            _ => None,
        }
    }
}
