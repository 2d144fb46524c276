//! Ledger-level sync: catching up committed transaction history and proofs.

use triad_types::{LedgerProof, LedgerUpdate, StateVersion};

/// Broadcast probe asking peers for their latest committed ledger proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusRequest;

/// A peer's answer: its latest committed ledger proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    /// The responder's latest proof.
    pub proof: LedgerProof,
}

/// Request for committed transactions after a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    /// The requester's current ledger version; the response should cover
    /// versions strictly above it.
    pub from_version: StateVersion,
}

impl SyncRequest {
    /// Build a request.
    pub fn new(from_version: StateVersion) -> Self {
        Self { from_version }
    }
}

/// Response carrying a committed batch plus the proof that committed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    /// Transactions for versions `(request.from_version, proof.version()]`
    /// with their proof.
    pub update: LedgerUpdate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_request_fields() {
        assert_eq!(
            SyncRequest::new(StateVersion(7)).from_version,
            StateVersion(7)
        );
    }
}
