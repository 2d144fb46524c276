//! Domain-separated signing messages.
//!
//! Every signed consensus message gets a unique domain tag so a signature
//! from one context can never be replayed in another.
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `vote:` | Votes on vertices (and therefore QC aggregates) |
//! | `timeout_vote:` | Timeout votes (and therefore TC aggregates) |

use crate::{EpochId, View, VoteData};

/// Domain tag for vertex votes.
pub const DOMAIN_VOTE: &[u8] = b"vote:";

/// Domain tag for timeout votes.
pub const DOMAIN_TIMEOUT_VOTE: &[u8] = b"timeout_vote:";

/// The message a validator signs when voting for a vertex.
///
/// Also the message verified against a QC's aggregated signature and, when
/// the vote data carries a commitment, against a ledger proof.
pub fn vote_message(vote_data: &VoteData) -> Vec<u8> {
    let hash = vote_data.content_hash();
    let mut message = Vec::with_capacity(DOMAIN_VOTE.len() + 32);
    message.extend_from_slice(DOMAIN_VOTE);
    message.extend_from_slice(hash.as_bytes());
    message
}

/// The message a validator signs when timing out a view.
///
/// Covers only (epoch, view): the attached high QC stays unsigned so that
/// timeout signatures for the same view aggregate even when senders know
/// different QCs.
pub fn timeout_message(epoch: EpochId, view: View) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_TIMEOUT_VOTE.len() + 16);
    message.extend_from_slice(DOMAIN_TIMEOUT_VOTE);
    message.extend_from_slice(&epoch.0.to_le_bytes());
    message.extend_from_slice(&view.0.to_le_bytes());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hash, StateVersion, VertexInfo};

    fn vote_data() -> VoteData {
        let info = VertexInfo {
            epoch: EpochId(0),
            view: View(1),
            vertex_hash: Hash::from_bytes(b"v"),
            version: StateVersion(0),
            accumulator: Hash::ZERO,
            timestamp_ms: 0,
        };
        VoteData {
            proposed: info.clone(),
            parent: info,
            committed: None,
        }
    }

    #[test]
    fn test_vote_message_deterministic() {
        assert_eq!(vote_message(&vote_data()), vote_message(&vote_data()));
        assert!(vote_message(&vote_data()).starts_with(DOMAIN_VOTE));
    }

    #[test]
    fn test_domains_disjoint() {
        // A timeout message can never collide with a vote message.
        let t = timeout_message(EpochId(0), View(1));
        let v = vote_message(&vote_data());
        assert_ne!(t, v);
        assert!(t.starts_with(DOMAIN_TIMEOUT_VOTE));
    }

    #[test]
    fn test_timeout_message_binds_epoch_and_view() {
        assert_ne!(
            timeout_message(EpochId(0), View(5)),
            timeout_message(EpochId(1), View(5))
        );
        assert_ne!(
            timeout_message(EpochId(0), View(5)),
            timeout_message(EpochId(0), View(6))
        );
    }
}
