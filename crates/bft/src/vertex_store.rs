//! The vertex store: the DAG of proposed-but-not-yet-committed vertices and
//! the three-chain commit rule.
//!
//! Vertices are speculatively executed through the state computer on
//! insertion. Inserting a QC adopts it as the high QC and, when its vote
//! data carries a commitment, drives the commit: the chain from the root to
//! the committed vertex is batched into one [`LedgerUpdate`], applied
//! through the version-gated ledger, handed to the state computer, and the
//! DAG is pruned to the new root. Re-delivery of an already-committed
//! certificate is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, trace};
use triad_core::{Ledger, LedgerError, StateComputer};
use triad_types::{
    CommittedBatch, EpochId, ExecutedVertex, Hash, LedgerHeader, LedgerProof, LedgerUpdate,
    QuorumCertificate, StateVersion, Transaction, Vertex, VertexInfo, View, VoteData,
};

/// Vertex store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VertexStoreError {
    /// A vertex arrived whose parent is not in the store. The caller
    /// triggers vertex sync for the parent.
    #[error("parent {parent_hash} of vertex {vertex_hash} is unknown")]
    MissingParent {
        /// The orphaned vertex.
        vertex_hash: Hash,
        /// Its unknown parent.
        parent_hash: Hash,
    },

    /// A certificate arrived for a vertex not in the store. The caller
    /// triggers vertex sync for the certified vertex.
    #[error("certified vertex {vertex_hash} is unknown")]
    MissingVertex {
        /// The unknown vertex.
        vertex_hash: Hash,
    },

    /// A vertex at or below the committed root; nothing to do with it.
    #[error("vertex at view {view} is at or below the root view {root_view}")]
    StaleVertex {
        /// The vertex's view.
        view: View,
        /// The current root view.
        root_view: View,
    },

    /// A quorum certified a commit that conflicts with what this node
    /// already committed. Unrecoverable: in BFT no retry fixes a forked
    /// commit. Surfaced loudly, never silently resolved.
    #[error(
        "byzantine quorum: conflicting commit at version {version} \
         (ours {ours}, theirs {theirs})"
    )]
    ByzantineQuorum {
        /// The disputed version.
        version: StateVersion,
        /// The vertex this node committed.
        ours: Hash,
        /// The vertex the conflicting proof commits.
        theirs: Hash,
    },

    /// The speculative execution results disagree with the applied ledger.
    #[error("commit of {got} transactions does not line up with ledger: {source}")]
    InconsistentLedger {
        /// Batch size of the failed commit.
        got: usize,
        /// The underlying ledger rejection.
        source: LedgerError,
    },
}

/// The DAG of pending vertices for one epoch, anchored at the last
/// committed vertex.
pub struct VertexStore {
    epoch: EpochId,
    state_computer: Arc<dyn StateComputer>,
    ledger: Arc<dyn Ledger>,

    /// The last committed vertex; parent link target for new growth.
    root: ExecutedVertex,

    /// All known vertices, including the root, keyed by content hash.
    vertices: HashMap<Hash, ExecutedVertex>,

    /// Children index for pruning.
    children: HashMap<Hash, Vec<Hash>>,

    /// Best certificate per certified vertex.
    qcs: HashMap<Hash, QuorumCertificate>,

    /// The QC with the greatest view known to this node.
    high_qc: QuorumCertificate,
}

impl VertexStore {
    /// Anchor a store at an executed root vertex (genesis or epoch
    /// boundary).
    pub fn new(
        root: ExecutedVertex,
        state_computer: Arc<dyn StateComputer>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let root_hash = root.hash();
        let root_qc = QuorumCertificate::genesis_for(root.info.clone(), None);
        let mut vertices = HashMap::new();
        vertices.insert(root_hash, root.clone());
        let mut qcs = HashMap::new();
        qcs.insert(root_hash, root_qc.clone());
        Self {
            epoch: root.info.epoch,
            state_computer,
            ledger,
            root,
            vertices,
            children: HashMap::new(),
            qcs,
            high_qc: root_qc,
        }
    }

    /// Re-anchor a store at a recovered commit (restart mid-epoch). The
    /// root's payload is gone; only its summary matters for parent links.
    pub fn recover(
        info: VertexInfo,
        state_computer: Arc<dyn StateComputer>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let vertex = Vertex::anchor(info.epoch, info.version, info.accumulator);
        let root = ExecutedVertex {
            vertex,
            info,
            next_validator_set: None,
        };
        Self::new(root, state_computer, ledger)
    }

    /// The committed root.
    pub fn root(&self) -> &ExecutedVertex {
        &self.root
    }

    /// The highest known QC.
    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.high_qc
    }

    /// Whether a vertex is in the store.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.vertices.contains_key(hash)
    }

    /// Look up an executed vertex.
    pub fn get(&self, hash: &Hash) -> Option<&ExecutedVertex> {
        self.vertices.get(hash)
    }

    /// Number of vertices held (root included).
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether only the root is held.
    pub fn is_empty(&self) -> bool {
        self.vertices.len() <= 1
    }

    /// Insert a vertex, speculatively executing it on top of its parent.
    /// Idempotent for vertices already held.
    #[instrument(skip(self, vertex), fields(view = vertex.view.0, epoch = vertex.epoch.0))]
    pub fn insert_vertex(&mut self, vertex: Vertex) -> Result<VertexInfo, VertexStoreError> {
        let vertex_hash = vertex.hash();
        if let Some(existing) = self.vertices.get(&vertex_hash) {
            trace!(vertex_hash = ?vertex_hash, "Vertex already in store");
            return Ok(existing.info.clone());
        }
        if vertex.view <= self.root.view() {
            return Err(VertexStoreError::StaleVertex {
                view: vertex.view,
                root_view: self.root.view(),
            });
        }
        let parent_hash = vertex.parent_hash();
        let Some(parent) = self.vertices.get(&parent_hash) else {
            return Err(VertexStoreError::MissingParent {
                vertex_hash,
                parent_hash,
            });
        };

        // Speculative execution; the result is cached with the vertex and
        // reused at commit time.
        let prepared = self.state_computer.prepare(&parent.info, &vertex);
        let info = VertexInfo {
            epoch: vertex.epoch,
            view: vertex.view,
            vertex_hash,
            version: prepared.version,
            accumulator: prepared.accumulator,
            timestamp_ms: vertex.timestamp_ms,
        };
        let executed = ExecutedVertex {
            vertex,
            info: info.clone(),
            next_validator_set: prepared.next_validator_set,
        };
        debug!(
            vertex_hash = ?vertex_hash,
            version = info.version.0,
            "Inserted vertex"
        );
        self.vertices.insert(vertex_hash, executed);
        self.children.entry(parent_hash).or_default().push(vertex_hash);
        Ok(info)
    }

    /// Insert a certificate for a vertex already in the store: adopt it as
    /// the high QC when newer and apply the commit rule. Returns the ledger
    /// update when a commit happened.
    #[instrument(skip(self, qc), fields(view = qc.view().0))]
    pub fn insert_qc(
        &mut self,
        qc: &QuorumCertificate,
    ) -> Result<Option<LedgerUpdate>, VertexStoreError> {
        let vertex_hash = qc.vertex_hash();
        if !self.vertices.contains_key(&vertex_hash) {
            if qc.view() <= self.root.view() {
                // Certificate for pruned history; nothing to do.
                return Ok(None);
            }
            return Err(VertexStoreError::MissingVertex { vertex_hash });
        }
        self.qcs.entry(vertex_hash).or_insert_with(|| qc.clone());
        if qc.view() > self.high_qc.view() {
            self.high_qc = qc.clone();
        }

        match qc.committed() {
            Some(header) => self.commit(header.clone(), qc),
            None => Ok(None),
        }
    }

    /// Apply a commitment carried by a certificate.
    fn commit(
        &mut self,
        header: LedgerHeader,
        qc: &QuorumCertificate,
    ) -> Result<Option<LedgerUpdate>, VertexStoreError> {
        let current = self.ledger.version();
        if header.info.version < current {
            // History below the applied ledger: re-delivery or a proof the
            // sync path already covered.
            trace!(version = header.info.version.0, "Commit already applied");
            return Ok(None);
        }
        if header.info.version == current {
            if header.info.vertex_hash == self.root.hash() {
                trace!(version = current.0, "Commit already applied");
                return Ok(None);
            }
            // A commit at the applied version that is not our root: either
            // a payload-free chain advancing the root without moving the
            // version, or a quorum disputing what we committed.
            if self.vertices.contains_key(&header.info.vertex_hash)
                && header.info.view > self.root.view()
            {
                debug!(
                    view = header.info.view.0,
                    version = current.0,
                    "Committed empty chain, advancing root without a ledger update"
                );
                self.prune_to(header.info.vertex_hash, qc);
                return Ok(None);
            }
            error!(
                version = header.info.version.0,
                ours = ?self.root.hash(),
                theirs = ?header.info.vertex_hash,
                "BYZANTINE QUORUM: conflicting commit detected"
            );
            return Err(VertexStoreError::ByzantineQuorum {
                version: header.info.version,
                ours: self.root.hash(),
                theirs: header.info.vertex_hash,
            });
        }

        // Gather the chain root → committed vertex, oldest first.
        let target_hash = header.info.vertex_hash;
        let root_hash = self.root.hash();
        let mut chain: Vec<Hash> = Vec::new();
        let mut cursor = target_hash;
        while cursor != root_hash {
            let Some(vertex) = self.vertices.get(&cursor) else {
                return Err(VertexStoreError::MissingVertex {
                    vertex_hash: cursor,
                });
            };
            chain.push(cursor);
            cursor = vertex.vertex.parent_hash();
        }
        chain.reverse();

        let transactions: Vec<Transaction> = chain
            .iter()
            .flat_map(|hash| self.vertices[hash].vertex.transactions.iter().cloned())
            .collect();
        let Some(proof) = LedgerProof::from_qc(qc) else {
            return Ok(None);
        };
        let update = LedgerUpdate {
            batch: CommittedBatch { transactions },
            proof,
        };

        match self.ledger.try_commit(&update) {
            Ok(()) => {}
            Err(LedgerError::NonContiguous { .. }) => {
                // Lost the race against ledger sync; the chain is already
                // durable. Prune without re-emitting.
                self.prune_to(target_hash, qc);
                return Ok(None);
            }
            Err(e @ LedgerError::LengthMismatch { .. }) => {
                return Err(VertexStoreError::InconsistentLedger {
                    got: update.batch.len(),
                    source: e,
                });
            }
        }
        self.state_computer.commit(&update);

        info!(
            version = update.version().0,
            view = header.info.view.0,
            transactions = update.batch.len(),
            "Committed vertex chain"
        );
        self.prune_to(target_hash, qc);
        Ok(Some(update))
    }

    /// Make `new_root` the root and drop everything not descended from it.
    fn prune_to(&mut self, new_root: Hash, qc: &QuorumCertificate) {
        let Some(root) = self.vertices.get(&new_root).cloned() else {
            return;
        };
        self.root = root;

        // Keep the subtree reachable from the new root.
        let mut reachable = vec![new_root];
        let mut keep: HashMap<Hash, ()> = HashMap::new();
        while let Some(hash) = reachable.pop() {
            keep.insert(hash, ());
            if let Some(kids) = self.children.get(&hash) {
                reachable.extend(kids.iter().copied());
            }
        }
        self.vertices.retain(|hash, _| keep.contains_key(hash));
        self.children.retain(|hash, _| keep.contains_key(hash));
        self.qcs.retain(|hash, _| keep.contains_key(hash));
        self.qcs.entry(new_root).or_insert_with(|| qc.clone());
        debug!(
            root_view = self.root.view().0,
            retained = self.vertices.len(),
            "Pruned vertex store"
        );
    }

    /// Produce the vote data for a vertex, plus the grandparent view the
    /// safety rules lock on.
    ///
    /// The commitment is filled in exactly when the vertex completes a
    /// contiguous three-chain: its view, its parent's, and its
    /// grandparent's are consecutive. Derived purely from the chain, so
    /// every honest voter produces identical vote data.
    pub fn vote_data_for(&self, vertex_hash: &Hash) -> Option<(VoteData, View)> {
        let vertex = self.vertices.get(vertex_hash)?;
        let parent = self.vertices.get(&vertex.vertex.parent_hash())?;
        let grandparent = if parent.hash() == self.root.hash() {
            parent
        } else {
            self.vertices.get(&parent.vertex.parent_hash())?
        };

        let contiguous = vertex.view() == parent.view().next()
            && parent.view() == grandparent.view().next();
        let committed = if contiguous {
            Some(grandparent.ledger_header())
        } else {
            None
        };
        Some((
            VoteData {
                proposed: vertex.info.clone(),
                parent: parent.info.clone(),
                committed,
            },
            grandparent.view(),
        ))
    }

    /// Serve a vertex chain for sync: up to `count` vertices starting at
    /// `hash`, newest first, walking parent links. The root itself is never
    /// served (its payload is pruned).
    pub fn get_chain(&self, hash: Hash, count: u32) -> Option<Vec<Vertex>> {
        let root_hash = self.root.hash();
        let mut chain = Vec::new();
        let mut cursor = hash;
        while chain.len() < count as usize && cursor != root_hash {
            let vertex = self.vertices.get(&cursor)?;
            chain.push(vertex.vertex.clone());
            cursor = vertex.vertex.parent_hash();
        }
        if chain.is_empty() {
            return None;
        }
        Some(chain)
    }

    /// The epoch this store serves.
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use triad_core::{InMemoryLedger, InMemoryStateComputer};
    use triad_types::{Signature, SignerBitfield, ValidatorId};

    struct Harness {
        store: VertexStore,
        ledger: Arc<InMemoryLedger>,
    }

    fn make_harness() -> Harness {
        let anchor = ExecutedVertex::anchor(EpochId(0), StateVersion(0), Hash::ZERO);
        let ledger = Arc::new(InMemoryLedger::new(LedgerProof::anchor(
            anchor.ledger_header(),
        )));
        let store = VertexStore::new(
            anchor,
            Arc::new(InMemoryStateComputer::new()),
            ledger.clone(),
        );
        Harness { store, ledger }
    }

    /// An unsigned QC for store-level tests; signature checks happen at the
    /// message boundary, not in the store.
    fn unsigned_qc(vote_data: VoteData) -> QuorumCertificate {
        QuorumCertificate {
            vote_data,
            aggregated_signature: Signature::empty(),
            signers: SignerBitfield::empty(),
            weighted_timestamp_ms: 0,
        }
    }

    /// Extend `parent` with a vertex at `view` carrying `txns`
    /// transactions, inserting both the vertex and (via vote data) the QC
    /// chain linkage.
    fn extend(
        harness: &mut Harness,
        parent_hash: Hash,
        view: u64,
        txns: usize,
    ) -> (Hash, QuorumCertificate) {
        let parent_qc = match harness.store.vote_data_for(&parent_hash) {
            Some((vote_data, _)) => unsigned_qc(vote_data),
            None => QuorumCertificate::genesis_for(harness.store.root().info.clone(), None),
        };
        let vertex = Vertex {
            epoch: EpochId(0),
            view: View(view),
            parent_qc,
            transactions: (0..txns)
                .map(|i| Transaction::new(vec![view as u8, i as u8]))
                .collect(),
            proposer: ValidatorId(0),
            timestamp_ms: view * 1000,
        };
        let hash = vertex.hash();
        harness.store.insert_vertex(vertex).unwrap();
        let (vote_data, _) = harness.store.vote_data_for(&hash).unwrap();
        (hash, unsigned_qc(vote_data))
    }

    #[traced_test]
    #[test]
    fn test_three_chain_commits_grandparent() {
        let mut harness = make_harness();
        let root_hash = harness.store.root().hash();

        let (v1, _qc1) = extend(&mut harness, root_hash, 1, 2);
        let (v2, _qc2) = extend(&mut harness, v1, 2, 1);
        let (v3, qc3) = extend(&mut harness, v2, 3, 0);

        // The vote data for v3 commits v1 (grandparent, contiguous chain).
        assert_eq!(
            qc3.committed().map(|h| h.info.vertex_hash),
            Some(v1),
            "three-chain commitment computed at vote time"
        );

        let update = harness.store.insert_qc(&qc3).unwrap().expect("commit");
        assert_eq!(update.version(), StateVersion(2));
        assert_eq!(update.batch.len(), 2);
        assert_eq!(harness.ledger.version(), StateVersion(2));
        assert_eq!(harness.store.root().hash(), v1);
        // v1 stays (as root); v2 and v3 stay (descendants).
        assert!(harness.store.contains(&v2));
        assert!(harness.store.contains(&v3));
    }

    #[traced_test]
    #[test]
    fn test_gap_in_views_defers_commit() {
        let mut harness = make_harness();
        let root_hash = harness.store.root().hash();

        let (v1, _) = extend(&mut harness, root_hash, 1, 1);
        // View 3 skips view 2: the chain v1 ← v3 is not contiguous.
        let (v3, qc3) = extend(&mut harness, v1, 3, 1);
        assert!(qc3.committed().is_none());
        assert!(harness.store.insert_qc(&qc3).unwrap().is_none());
        assert_eq!(harness.ledger.version(), StateVersion(0));

        // v4 on v3: contiguous pair but grandparent v1 is one view short.
        let (_v4, qc4) = extend(&mut harness, v3, 4, 0);
        assert!(qc4.committed().is_none());

        // v5 completes v3 ← v4 ← v5, committing v3 (and v1 beneath it).
        let (v5, qc5) = extend(&mut harness, _v4, 5, 0);
        let _ = v5;
        assert_eq!(qc5.committed().map(|h| h.info.vertex_hash), Some(v3));
        let update = harness.store.insert_qc(&qc5).unwrap().expect("commit");
        assert_eq!(update.batch.len(), 2, "v1 and v3 transactions batched");
        assert_eq!(harness.store.root().hash(), v3);
    }

    #[traced_test]
    #[test]
    fn test_commit_is_idempotent() {
        let mut harness = make_harness();
        let root_hash = harness.store.root().hash();
        let (v1, _) = extend(&mut harness, root_hash, 1, 1);
        let (v2, _) = extend(&mut harness, v1, 2, 0);
        let (_v3, qc3) = extend(&mut harness, v2, 3, 0);

        let first = harness.store.insert_qc(&qc3).unwrap();
        assert!(first.is_some());
        // Re-delivering the same certificate produces no second update and
        // no state change.
        let second = harness.store.insert_qc(&qc3).unwrap();
        assert!(second.is_none());
        assert_eq!(harness.ledger.version(), StateVersion(1));
    }

    #[traced_test]
    #[test]
    fn test_missing_parent_reported_for_sync() {
        let mut harness = make_harness();
        let orphan = Vertex {
            epoch: EpochId(0),
            view: View(7),
            parent_qc: unsigned_qc(VoteData {
                proposed: VertexInfo {
                    epoch: EpochId(0),
                    view: View(6),
                    vertex_hash: Hash::from_bytes(b"unknown-parent"),
                    version: StateVersion(6),
                    accumulator: Hash::ZERO,
                    timestamp_ms: 0,
                },
                parent: harness.store.root().info.clone(),
                committed: None,
            }),
            transactions: vec![],
            proposer: ValidatorId(1),
            timestamp_ms: 0,
        };
        let vertex_hash = orphan.hash();
        assert_eq!(
            harness.store.insert_vertex(orphan),
            Err(VertexStoreError::MissingParent {
                vertex_hash,
                parent_hash: Hash::from_bytes(b"unknown-parent"),
            })
        );
    }

    #[traced_test]
    #[test]
    fn test_conflicting_commit_is_byzantine_quorum() {
        let mut harness = make_harness();
        let root_hash = harness.store.root().hash();
        let (v1, _) = extend(&mut harness, root_hash, 1, 1);
        let (v2, _) = extend(&mut harness, v1, 2, 0);
        let (_v3, qc3) = extend(&mut harness, v2, 3, 0);
        harness.store.insert_qc(&qc3).unwrap();

        // A proof claiming a different vertex at the committed version.
        let mut forged = qc3.clone();
        if let Some(header) = &mut forged.vote_data.committed {
            header.info.vertex_hash = Hash::from_bytes(b"conflicting");
        }
        assert!(matches!(
            harness.store.insert_qc(&forged),
            Err(VertexStoreError::ByzantineQuorum { .. })
        ));
    }

    #[traced_test]
    #[test]
    fn test_serves_chains_for_sync() {
        let mut harness = make_harness();
        let root_hash = harness.store.root().hash();
        let (v1, _) = extend(&mut harness, root_hash, 1, 1);
        let (v2, _) = extend(&mut harness, v1, 2, 1);
        let (v3, _) = extend(&mut harness, v2, 3, 0);

        let chain = harness.store.get_chain(v3, 2).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].hash(), v3);
        assert_eq!(chain[1].hash(), v2);

        // Walking stops at the root.
        let chain = harness.store.get_chain(v1, 10).unwrap();
        assert_eq!(chain.len(), 1);

        assert!(harness
            .store
            .get_chain(Hash::from_bytes(b"nowhere"), 4)
            .is_none());
    }

    #[traced_test]
    #[test]
    fn test_empty_chain_advances_root_without_update() {
        let mut harness = make_harness();
        let root_hash = harness.store.root().hash();
        // No transactions anywhere: the version never moves.
        let (v1, _) = extend(&mut harness, root_hash, 1, 0);
        let (v2, _) = extend(&mut harness, v1, 2, 0);
        let (_v3, qc3) = extend(&mut harness, v2, 3, 0);

        assert_eq!(qc3.committed().map(|h| h.info.vertex_hash), Some(v1));
        // The chain commits (root advances, pruning applies) but there is
        // nothing to emit: ledger updates must strictly increase the
        // version.
        assert!(harness.store.insert_qc(&qc3).unwrap().is_none());
        assert_eq!(harness.store.root().hash(), v1);
        assert_eq!(harness.ledger.version(), StateVersion(0));

        // Re-delivery stays a no-op, not byzantine evidence.
        assert!(harness.store.insert_qc(&qc3).unwrap().is_none());
    }

    #[traced_test]
    #[test]
    fn test_prune_drops_abandoned_branch() {
        let mut harness = make_harness();
        let root_hash = harness.store.root().hash();
        let (v1, _) = extend(&mut harness, root_hash, 1, 1);
        // A competing branch off the root at view 2 (e.g. view-1 leader was
        // distrusted by others).
        let (fork, _) = extend(&mut harness, root_hash, 2, 1);

        let (v2, _) = extend(&mut harness, v1, 2, 1);
        // Contiguity is about views, and the fork occupies view 2; build
        // the committing chain on views 3..4 via v1's branch? Views must
        // increase along the chain, so re-extend from v2.
        let (v3, _) = extend(&mut harness, v2, 3, 0);
        let (_v4, qc4) = extend(&mut harness, v3, 4, 0);
        // v2 ← v3 ← v4 contiguous: commits v2.
        assert_eq!(qc4.committed().map(|h| h.info.vertex_hash), Some(v2));
        harness.store.insert_qc(&qc4).unwrap().expect("commit");

        assert_eq!(harness.store.root().hash(), v2);
        assert!(!harness.store.contains(&fork), "abandoned branch pruned");
        assert!(!harness.store.contains(&v1), "committed ancestors pruned");
    }
}
