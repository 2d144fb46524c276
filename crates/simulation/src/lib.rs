//! Deterministic simulation of a triad validator network.
//!
//! Every node is a [`NodeStateMachine`](triad_node::NodeStateMachine) fed
//! from one global event queue ordered by (time, priority, node, sequence).
//! The runner executes all actions itself: messages travel through a
//! [`SimulatedNetwork`] with seeded latency, loss, and partitions; timers
//! are queue entries; delegated signature checks run inline. Given the same
//! seed and schedule of fault injections, a run is bit-for-bit repeatable.

mod event_queue;
mod network;
mod runner;

pub use event_queue::EventKey;
pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{SimulationConfig, SimulationRunner, SimulationStats};

/// Index of a node within the simulation. Maps one-to-one onto
/// `ValidatorId(index)`.
pub type NodeIndex = u32;
