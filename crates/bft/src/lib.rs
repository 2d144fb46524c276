//! BFT consensus engine.
//!
//! A deterministic, event-driven implementation of chained BFT consensus
//! for a permissioned validator set: validators propose vertices carrying
//! transaction batches, vote on them, and commit a vertex once a
//! quorum-certified three-chain forms.
//!
//! # Components
//!
//! - [`Pacemaker`] - timeout-driven view progression with exponential
//!   backoff and timeout certificates
//! - [`VertexStore`] - the DAG of pending vertices plus the three-chain
//!   commit rule
//! - [`ProposerElection`] / [`WeightedRoundRobin`] - the deterministic
//!   leader schedule
//! - [`VertexSync`] - fetching missing ancestor vertices from peers,
//!   rate-limited and retry-bounded
//! - [`EpochManager`] - top-level orchestration and epoch transitions
//!
//! Safety-critical signing lives in `triad-safety`; every vote and timeout
//! vote passes through its rules and is persisted before it is sent.
//!
//! # Event flow
//!
//! - proposal received → validate, verify parent QC, execute, vote
//! - vote received → verify, aggregate, form QC at quorum
//! - QC formed → adopt, maybe commit via the three-chain rule, advance view
//! - pacemaker timeout → timeout vote; quorum of them → TC → advance view

mod config;
mod election;
mod epoch;
mod pacemaker;
mod pending_votes;
mod vertex_store;
mod vertex_sync;

pub use config::{BftConfig, RateLimitConfig};
pub use election::{ProposerElection, WeightedRoundRobin};
pub use epoch::EpochManager;
pub use pacemaker::{Pacemaker, PacemakerStatus};
pub use pending_votes::{PendingVotes, VoteInsertion};
pub use vertex_store::{VertexStore, VertexStoreError};
pub use vertex_sync::{RetryOutcome, TokenBucket, VertexSync};
