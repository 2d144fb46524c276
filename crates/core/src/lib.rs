//! Core abstractions for the triad consensus engine:
//!
//! - [`Event`]: all possible inputs to the state machine
//! - [`Action`]: all possible outputs from the state machine
//! - [`EventPriority`]: ordering for events at the same timestamp
//! - [`StateMachine`]: the trait every protocol component composes into
//! - collaborator traits ([`StateComputer`], [`Ledger`], [`MempoolSource`],
//!   [`SafetyStore`]) with in-memory implementations
//!
//! # Architecture
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is synchronous, deterministic, and performs no I/O.
//! The runner (simulation or production) delivers events, executes the
//! returned actions, and converts results of delegated work back into
//! events.

mod action;
mod event;
mod message;
mod providers;
mod traits;

pub use action::Action;
pub use event::{Event, EventPriority};
pub use message::OutboundMessage;
pub use providers::{InMemoryLedger, InMemoryMempool, InMemorySafetyStore, InMemoryStateComputer};
pub use traits::{
    Ledger, LedgerError, MempoolSource, PersistError, PreparedVertex, SafetyStore, StateComputer,
    StateMachine,
};

use triad_types::Hash;

/// Identities for cancellable timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// The pacemaker's per-view timeout.
    Pacemaker,
    /// Patience window for one outstanding vertex request.
    VertexRequest(Hash),
    /// Periodic ledger-sync health check.
    LedgerSyncCheck,
    /// Status-collection window of a ledger sync round.
    LedgerSyncStatus,
    /// Patience window for an outstanding ledger sync request.
    LedgerSyncRequest,
}
