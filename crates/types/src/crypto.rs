//! BLS12-381 key pairs, signatures, and aggregation.
//!
//! Consensus messages (votes, timeout votes) are BLS-signed so that a quorum
//! of signatures can be aggregated into a single certificate signature.

use std::fmt;

/// A BLS12-381 signing key pair (min_pk variant: 48-byte public keys,
/// 96-byte signatures).
#[derive(Clone)]
pub struct KeyPair {
    secret: blst::min_pk::SecretKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        Self::from_seed(&ikm)
    }

    /// Derive a key pair from a 32-byte seed (deterministic, for tests and
    /// simulation).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let secret = blst::min_pk::SecretKey::key_gen(seed, &[])
            .expect("32-byte IKM always satisfies key_gen");
        Self { secret }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.secret.sign(message, &[], &[]);
        Signature(sig.to_bytes().to_vec())
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.secret.sk_to_pk().to_bytes().to_vec())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.public_key())
    }
}

/// A BLS12-381 public key (48 bytes compressed).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(pk) = blst::min_pk::PublicKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = blst::min_pk::Signature::from_bytes(&signature.0) else {
            return false;
        };
        sig.verify(true, message, &[], &[], &pk, true) == blst::BLST_ERROR::BLST_SUCCESS
    }

    /// Aggregate several public keys into one (for verifying an aggregated
    /// signature where all signers signed the same message).
    pub fn aggregate(keys: &[PublicKey]) -> Result<Self, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::EmptyAggregation);
        }
        let parsed: Result<Vec<_>, _> = keys
            .iter()
            .map(|k| {
                blst::min_pk::PublicKey::from_bytes(&k.0).map_err(|_| CryptoError::MalformedKey)
            })
            .collect();
        let parsed = parsed?;
        let refs: Vec<&blst::min_pk::PublicKey> = parsed.iter().collect();
        let agg = blst::min_pk::AggregatePublicKey::aggregate(&refs, false)
            .map_err(|_| CryptoError::AggregationFailed)?;
        Ok(PublicKey(agg.to_public_key().to_bytes().to_vec()))
    }

    /// Raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0);
        write!(f, "PublicKey({}..)", &hex[..8.min(hex.len())])
    }
}

/// A BLS12-381 signature (96 bytes compressed).
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Placeholder signature for genesis certificates and tests.
    pub fn empty() -> Self {
        Signature(Vec::new())
    }

    /// Check whether this is the placeholder signature.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Aggregate several signatures over the same message.
    pub fn aggregate(signatures: &[Signature]) -> Result<Self, CryptoError> {
        if signatures.is_empty() {
            return Err(CryptoError::EmptyAggregation);
        }
        let parsed: Result<Vec<_>, _> = signatures
            .iter()
            .map(|s| {
                blst::min_pk::Signature::from_bytes(&s.0)
                    .map_err(|_| CryptoError::MalformedSignature)
            })
            .collect();
        let parsed = parsed?;
        let refs: Vec<&blst::min_pk::Signature> = parsed.iter().collect();
        let agg = blst::min_pk::AggregateSignature::aggregate(&refs, true)
            .map_err(|_| CryptoError::AggregationFailed)?;
        Ok(Signature(agg.to_signature().to_bytes().to_vec()))
    }

    /// Raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "Signature(empty)");
        }
        write!(f, "Signature({}..)", &hex::encode(&self.0)[..16])
    }
}

/// Errors from signature aggregation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Empty list provided to an aggregation.
    #[error("cannot aggregate an empty list")]
    EmptyAggregation,

    /// A public key failed to parse.
    #[error("malformed public key")]
    MalformedKey,

    /// A signature failed to parse.
    #[error("malformed signature")]
    MalformedSignature,

    /// The underlying aggregation operation failed.
    #[error("aggregation failed")]
    AggregationFailed,
}
