//! Vertex-level BFT sync: fetching missing ancestor vertices by hash.

use triad_types::{Hash, QuorumCertificate, Vertex};

/// Request for a vertex and up to `count - 1` of its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetVerticesRequest {
    /// Hash of the newest wanted vertex.
    pub vertex_hash: Hash,
    /// Maximum chain length to return, newest first.
    pub count: u32,
}

impl GetVerticesRequest {
    /// Build a request.
    pub fn new(vertex_hash: Hash, count: u32) -> Self {
        Self { vertex_hash, count }
    }
}

/// Response carrying the requested vertex chain, newest first: the first
/// element hashes to the requested hash and each following element is the
/// previous one's parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVerticesResponse {
    /// The chain, newest first.
    pub vertices: Vec<Vertex>,
}

impl GetVerticesResponse {
    /// Build a response.
    pub fn new(vertices: Vec<Vertex>) -> Self {
        Self { vertices }
    }
}

/// Negative response: the responder does not have the requested vertex.
/// Carries the responder's high QC so the requester can re-target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVerticesErrorResponse {
    /// The hash that could not be served.
    pub vertex_hash: Hash,
    /// The responder's highest known QC.
    pub high_qc: QuorumCertificate,
}
