//! The combined validator state machine.
//!
//! [`NodeStateMachine`] composes the epoch-scoped consensus engine
//! (`triad-bft`) and the ledger sync service (`triad-sync`) behind one
//! [`StateMachine`](triad_core::StateMachine) surface: a single event queue
//! in, a single action stream out. The dispatch table in
//! [`NodeStateMachine::handle`] is the only place an event variant is bound
//! to its handler.

mod state;

pub use state::NodeStateMachine;
