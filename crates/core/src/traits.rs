//! The state-machine abstraction and the narrow interfaces to external
//! collaborators.

use crate::{Action, Event};
use std::time::Duration;
use triad_types::{
    Hash, LedgerProof, LedgerUpdate, SafetyState, StateVersion, Transaction, ValidatorSet, Vertex,
    VertexInfo,
};

/// A deterministic state machine that processes events.
///
/// Guarantees:
/// - **Synchronous**: `handle` never blocks or awaits.
/// - **Deterministic**: same state + same event ⇒ same actions.
/// - **No I/O**: all I/O happens in the runner via the returned actions.
///
/// The runner calls `set_time` before each `handle` so protocol code never
/// reads a wall clock.
pub trait StateMachine {
    /// Process one event, returning actions for the runner to execute.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Set the current time, as a duration since an arbitrary runner epoch.
    fn set_time(&mut self, now: Duration);

    /// The time last set via `set_time`.
    fn now(&self) -> Duration;
}

/// Result of speculatively executing a vertex on top of its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedVertex {
    /// Ledger version after the vertex's transactions.
    pub version: StateVersion,
    /// Transaction accumulator hash after the vertex's transactions.
    pub accumulator: Hash,
    /// Populated when execution decides the epoch ends at this vertex.
    pub next_validator_set: Option<ValidatorSet>,
}

/// The transaction execution engine, external to consensus.
///
/// `prepare` is a suspension point for the calling event only: it may block
/// on storage, but it is invoked from the single protocol thread and must be
/// deterministic for a given (parent, vertex).
pub trait StateComputer: Send + Sync {
    /// Speculatively execute a vertex's transactions on top of its
    /// (already prepared) parent.
    fn prepare(&self, parent: &VertexInfo, vertex: &Vertex) -> PreparedVertex;

    /// Durably apply a committed batch. Called exactly once per committed
    /// vertex, in version order.
    fn commit(&self, update: &LedgerUpdate);
}

/// Read/write access to the committed ledger, shared by the commit path and
/// the ledger sync service.
pub trait Ledger: Send + Sync {
    /// Current committed version.
    fn version(&self) -> StateVersion;

    /// Latest committed proof.
    fn latest_proof(&self) -> LedgerProof;

    /// Serve committed transactions after `from_version`, up to `limit`,
    /// together with a proof covering the end of the range. Returns None
    /// when nothing newer is committed or the range is no longer coverable
    /// by a retained proof.
    fn batch(&self, from_version: StateVersion, limit: usize) -> Option<LedgerUpdate>;

    /// Apply an update atomically if and only if it extends the current
    /// version. Non-extending updates are rejected, which is what makes
    /// concurrent live commits and sync-driven batches safe to interleave.
    fn try_commit(&self, update: &LedgerUpdate) -> Result<(), LedgerError>;
}

/// Ledger application failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The update does not extend the current version.
    #[error("update to {got} does not extend committed version {current}")]
    NonContiguous {
        /// Current committed version.
        current: StateVersion,
        /// The update's end version.
        got: StateVersion,
    },

    /// The update's batch length disagrees with its version delta.
    #[error("batch of {batch_len} transactions cannot advance {current} to {got}")]
    LengthMismatch {
        /// Current committed version.
        current: StateVersion,
        /// The update's end version.
        got: StateVersion,
        /// Transactions in the batch.
        batch_len: usize,
    },
}

/// Candidate-transaction supplier, external to consensus. Pulled when
/// proposing; notified after commits.
pub trait MempoolSource: Send + Sync {
    /// Take up to `max` candidate transactions for a proposal.
    fn next_batch(&self, max: usize) -> Vec<Transaction>;

    /// Observe a committed update (to drop included transactions).
    fn notify_committed(&self, update: &LedgerUpdate);
}

/// Durable storage for the safety record. Runners use this to execute
/// `Action::PersistSafetyState`; the persist must complete before any
/// broadcast queued behind it is sent.
pub trait SafetyStore: Send + Sync {
    /// Persist the record. An error halts voting.
    fn persist(&self, state: &SafetyState) -> Result<(), PersistError>;

    /// Load the record persisted last, if any.
    fn load(&self) -> Option<SafetyState>;
}

/// Safety-record persistence failure. Fatal for voting: the node must not
/// vote without a durable record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to persist safety state: {reason}")]
pub struct PersistError {
    /// Description of the failure.
    pub reason: String,
}
