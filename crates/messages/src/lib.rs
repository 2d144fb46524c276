//! Network messages for the triad consensus protocol.

pub mod gossip;
pub mod ledger_sync;
pub mod vertex_request;

// Re-export commonly used types
pub use gossip::{
    Proposal, ProposalGossip, TimeoutCertificateGossip, TimeoutVoteGossip, VoteGossip,
};
pub use ledger_sync::{StatusRequest, StatusResponse, SyncRequest, SyncResponse};
pub use vertex_request::{GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse};
