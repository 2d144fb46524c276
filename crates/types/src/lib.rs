//! Core types for the triad consensus engine.
//!
//! Everything here is passive, deterministic data: identifiers, crypto
//! primitives, vertices and certificates, and the ledger commitment types
//! shared by the consensus and sync protocols.

mod certificates;
mod crypto;
mod hash;
mod identifiers;
mod ledger;
mod safety;
pub mod signing;
mod signer_bitfield;
mod validator_set;
mod vertex;

pub use certificates::{
    CertificateError, QuorumCertificate, TimeoutCertificate, TimeoutVote, Vote, VoteData,
};
pub use crypto::{CryptoError, KeyPair, PublicKey, Signature};
pub use hash::Hash;
pub use identifiers::{EpochId, StateVersion, ValidatorId, View};
pub use ledger::{CommittedBatch, LedgerHeader, LedgerProof, LedgerUpdate, VertexInfo};
pub use safety::SafetyState;
pub use signer_bitfield::SignerBitfield;
pub use validator_set::{QuorumFraction, ValidatorInfo, ValidatorSet};
pub use vertex::{ExecutedVertex, Transaction, Vertex};
