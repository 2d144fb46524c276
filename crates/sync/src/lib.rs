//! Ledger-level sync: keeping a node's committed ledger caught up with the
//! network.
//!
//! This is the sibling protocol to vertex sync. Vertex sync deals with
//! in-flight, uncommitted proposals; ledger sync deals with history that
//! already committed. The service probes peers for their latest
//! [`LedgerProof`](triad_types::LedgerProof)s, picks the highest proven
//! version, and pulls committed transaction batches until it catches up.
//!
//! Batches are applied through the shared version-gated
//! [`Ledger`](triad_core::Ledger), so sync-driven batches and live
//! BFT commits can interleave freely: whichever path reaches a version first
//! wins and the other's non-extending update is dropped.

mod config;
mod service;

pub use config::LedgerSyncConfig;
pub use service::{LedgerSyncService, LedgerSyncStatus, SyncPhaseKind};
