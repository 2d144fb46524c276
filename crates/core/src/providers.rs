//! In-memory collaborator implementations.
//!
//! Production deployments supply their own ledger, state computer, mempool,
//! and safety store; these implementations back tests, simulation, and
//! bootstrapping.

use crate::{
    Ledger, LedgerError, MempoolSource, PersistError, PreparedVertex, SafetyStore, StateComputer,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use triad_types::{
    Hash, LedgerProof, LedgerUpdate, SafetyState, StateVersion, Transaction, ValidatorSet, Vertex,
    VertexInfo, View,
};

/// A committed ledger held in memory: the transaction log plus every proof
/// seen, indexed by version for batch serving.
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
}

struct LedgerInner {
    /// Version before the first transaction in `transactions`.
    base_version: StateVersion,
    /// Committed transactions, in order.
    transactions: Vec<Transaction>,
    /// Proofs by committed version. Always contains the latest.
    proofs: BTreeMap<u64, LedgerProof>,
}

impl InMemoryLedger {
    /// Start a ledger at an anchor proof (genesis for a fresh chain).
    pub fn new(anchor: LedgerProof) -> Self {
        let base_version = anchor.version();
        let mut proofs = BTreeMap::new();
        proofs.insert(base_version.0, anchor);
        Self {
            inner: Mutex::new(LedgerInner {
                base_version,
                transactions: Vec::new(),
                proofs,
            }),
        }
    }

    /// All committed transactions, for test assertions.
    pub fn committed_transactions(&self) -> Vec<Transaction> {
        self.inner.lock().expect("ledger lock").transactions.clone()
    }
}

impl Ledger for InMemoryLedger {
    fn version(&self) -> StateVersion {
        let inner = self.inner.lock().expect("ledger lock");
        StateVersion(inner.base_version.0 + inner.transactions.len() as u64)
    }

    fn latest_proof(&self) -> LedgerProof {
        let inner = self.inner.lock().expect("ledger lock");
        inner
            .proofs
            .values()
            .next_back()
            .expect("ledger always holds its anchor proof")
            .clone()
    }

    fn batch(&self, from_version: StateVersion, limit: usize) -> Option<LedgerUpdate> {
        let inner = self.inner.lock().expect("ledger lock");
        if from_version < inner.base_version {
            // History before the anchor is no longer retained.
            return None;
        }
        // The earliest retained proof past the requested version bounds the
        // batch; proofs exist per committed vertex so the overshoot past
        // `limit` is at most one commit's worth.
        let mut end = None;
        for (&version, proof) in inner.proofs.range(from_version.0 + 1..) {
            end = Some((version, proof.clone()));
            if (version - from_version.0) as usize >= limit {
                break;
            }
        }
        let (end_version, proof) = end?;
        let start = (from_version.0 - inner.base_version.0) as usize;
        let stop = (end_version - inner.base_version.0) as usize;
        Some(LedgerUpdate {
            batch: triad_types::CommittedBatch {
                transactions: inner.transactions[start..stop].to_vec(),
            },
            proof,
        })
    }

    fn try_commit(&self, update: &LedgerUpdate) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("ledger lock");
        let current = StateVersion(inner.base_version.0 + inner.transactions.len() as u64);
        let got = update.version();
        let expected = current.advanced_by(update.batch.len() as u64);
        if got <= current {
            return Err(LedgerError::NonContiguous { current, got });
        }
        if got != expected {
            return Err(LedgerError::LengthMismatch {
                current,
                got,
                batch_len: update.batch.len(),
            });
        }
        inner
            .transactions
            .extend(update.batch.transactions.iter().cloned());
        inner.proofs.insert(got.0, update.proof.clone());
        Ok(())
    }
}

/// A state computer that folds transaction hashes into an accumulator and
/// (optionally) ends the epoch at a configured view.
pub struct InMemoryStateComputer {
    epoch_ceiling: Option<(View, ValidatorSet)>,
    commits: Mutex<Vec<StateVersion>>,
}

impl InMemoryStateComputer {
    /// A computer that never ends the epoch.
    pub fn new() -> Self {
        Self {
            epoch_ceiling: None,
            commits: Mutex::new(Vec::new()),
        }
    }

    /// A computer that emits `next_set` for every vertex at or above
    /// `ceiling`, ending the epoch once such a vertex commits.
    pub fn with_epoch_ceiling(ceiling: View, next_set: ValidatorSet) -> Self {
        Self {
            epoch_ceiling: Some((ceiling, next_set)),
            commits: Mutex::new(Vec::new()),
        }
    }

    /// Versions committed so far, for test assertions.
    pub fn committed_versions(&self) -> Vec<StateVersion> {
        self.commits.lock().expect("commit log lock").clone()
    }
}

impl Default for InMemoryStateComputer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateComputer for InMemoryStateComputer {
    fn prepare(&self, parent: &VertexInfo, vertex: &Vertex) -> PreparedVertex {
        let mut accumulator = *parent.accumulator.as_bytes();
        for tx in &vertex.transactions {
            accumulator = *Hash::from_parts(&[&accumulator, tx.hash().as_bytes()]).as_bytes();
        }
        let next_validator_set = match &self.epoch_ceiling {
            Some((ceiling, next)) if vertex.view >= *ceiling => Some(next.clone()),
            _ => None,
        };
        PreparedVertex {
            version: parent.version.advanced_by(vertex.transactions.len() as u64),
            accumulator: Hash::from_digest(&accumulator),
            next_validator_set,
        }
    }

    fn commit(&self, update: &LedgerUpdate) {
        self.commits
            .lock()
            .expect("commit log lock")
            .push(update.version());
    }
}

/// A FIFO mempool. Candidates stay available until a commit removes them.
#[derive(Default)]
pub struct InMemoryMempool {
    queue: Mutex<Vec<Transaction>>,
}

impl InMemoryMempool {
    /// An empty mempool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate transaction.
    pub fn add(&self, tx: Transaction) {
        self.queue.lock().expect("mempool lock").push(tx);
    }

    /// Number of pending candidates.
    pub fn len(&self) -> usize {
        self.queue.lock().expect("mempool lock").len()
    }

    /// Whether no candidates are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MempoolSource for InMemoryMempool {
    fn next_batch(&self, max: usize) -> Vec<Transaction> {
        let queue = self.queue.lock().expect("mempool lock");
        queue.iter().take(max).cloned().collect()
    }

    fn notify_committed(&self, update: &LedgerUpdate) {
        let committed: Vec<Hash> = update
            .batch
            .transactions
            .iter()
            .map(|tx| tx.hash())
            .collect();
        let mut queue = self.queue.lock().expect("mempool lock");
        queue.retain(|tx| !committed.contains(&tx.hash()));
    }
}

/// An in-memory safety store with a failure switch for exercising the
/// halt-voting path.
#[derive(Default)]
pub struct InMemorySafetyStore {
    state: Mutex<Option<SafetyState>>,
    fail_persist: AtomicBool,
}

impl InMemorySafetyStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent persists fail (or succeed again).
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }
}

impl SafetyStore for InMemorySafetyStore {
    fn persist(&self, state: &SafetyState) -> Result<(), PersistError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(PersistError {
                reason: "persist failure injected".to_string(),
            });
        }
        *self.state.lock().expect("safety store lock") = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> Option<SafetyState> {
        self.state.lock().expect("safety store lock").clone()
    }
}
