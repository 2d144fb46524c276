//! Safety rules: the only component allowed to produce a vote or a timeout
//! vote.
//!
//! Everything that could make this validator equivocate funnels through
//! [`SafetyRules`]. The rules hold the persistent [`SafetyState`] record and
//! enforce, in order:
//!
//! 1. never sign two votes for the same view;
//! 2. never vote for a vertex whose parent view is below the locked view
//!    (the locking rule that keeps leader changes safe);
//! 3. never sign more than one timeout per view, and never vote in a view
//!    after timing it out.
//!
//! Callers must emit `Action::PersistSafetyState` with the updated record
//! **before** the broadcast carrying the signed message; a crash after
//! persist-before-send is safe, a crash before persist never produced an
//! unsafe signature because the signature never left the node.

mod rules;

pub use rules::{SafetyError, SafetyRules};
