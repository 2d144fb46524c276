//! Bitfield recording which committee members contributed to an aggregate
//! signature.

/// A compact bitfield over committee indices.
///
/// Stored as 64-bit words; index order matches the validator set's committee
/// ordering so that verifiers can resolve public keys positionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerBitfield {
    words: Vec<u64>,
    committee_size: usize,
}

impl SignerBitfield {
    /// Create an empty bitfield for a committee of the given size.
    pub fn new(committee_size: usize) -> Self {
        Self {
            words: vec![0u64; committee_size.div_ceil(64)],
            committee_size,
        }
    }

    /// The empty bitfield (genesis certificates).
    pub fn empty() -> Self {
        Self::new(0)
    }

    /// Mark a committee index as having signed. Out-of-range indices are
    /// ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.committee_size {
            self.words[index / 64] |= 1u64 << (index % 64);
        }
    }

    /// Whether a committee index has signed.
    pub fn is_set(&self, index: usize) -> bool {
        index < self.committee_size && (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Number of signers.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The committee size this bitfield was built for.
    pub fn committee_size(&self) -> usize {
        self.committee_size
    }

    /// Iterator over set committee indices, ascending.
    pub fn set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.committee_size).filter(|&i| self.is_set(i))
    }

    /// Whether no bits are set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

impl Default for SignerBitfield {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_count() {
        let mut bf = SignerBitfield::new(70);
        bf.set(0);
        bf.set(63);
        bf.set(64);
        bf.set(69);
        bf.set(70); // out of range, ignored
        assert_eq!(bf.count(), 4);
        assert!(bf.is_set(64));
        assert!(!bf.is_set(70));
        assert_eq!(bf.set_indices().collect::<Vec<_>>(), vec![0, 63, 64, 69]);
    }

    #[test]
    fn test_empty() {
        assert!(SignerBitfield::empty().is_empty());
        assert_eq!(SignerBitfield::empty().count(), 0);
    }
}
