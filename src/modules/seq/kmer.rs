//! Set of short nucleotide sequences
//!
//! Short wildcard-free nucleotide sequences (barcodes, UMIs, k-mers) are
//! folded into a single `u64`: two bits per base, with the length stored in
//! the top bits, so membership tests never touch the packed sequence again.

use std::collections::HashSet;

use super::alphabet::Alphabet;
use super::sequence::{EncodedSequence, SequenceError, SequenceResult};

/// Longest sequence that fits in a key
pub const MAX_KEY_LENGTH: usize = 29;

const LENGTH_SHIFT: u32 = 58;

/// Fold a short nucleotide sequence into a `u64` key
pub fn kmer_key(sequence: &EncodedSequence) -> SequenceResult<u64> {
    if sequence.alphabet() != Alphabet::Nucleotide {
        return Err(SequenceError::UnsupportedAlphabet {
            alphabet: sequence.alphabet(),
            operation: "k-mer key",
        });
    }
    if sequence.len() > MAX_KEY_LENGTH {
        return Err(SequenceError::RangeError {
            start: 0,
            end: sequence.len(),
            len: MAX_KEY_LENGTH,
        });
    }

    let mut key = 0u64;
    for (position, code) in sequence.codes().enumerate() {
        if Alphabet::Nucleotide.is_wildcard(code) {
            return Err(SequenceError::InvalidSymbol {
                alphabet: Alphabet::Nucleotide,
                symbol: Alphabet::Nucleotide.symbol_of(code).unwrap_or(b'?') as char,
                position,
            });
        }
        key = (key << 2) | code as u64;
    }
    Ok(key | (sequence.len() as u64) << LENGTH_SHIFT)
}

/// Hash set of short nucleotide sequences
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortSequenceSet {
    keys: HashSet<u64>,
}

impl ShortSequenceSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sequence; returns `false` if it was already present
    pub fn insert(&mut self, sequence: &EncodedSequence) -> SequenceResult<bool> {
        Ok(self.keys.insert(kmer_key(sequence)?))
    }

    /// Membership test; sequences that cannot be keyed are never members
    pub fn contains(&self, sequence: &EncodedSequence) -> bool {
        kmer_key(sequence).map_or(false, |key| self.keys.contains(&key))
    }

    /// Number of distinct sequences
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dna(s: &[u8]) -> EncodedSequence {
        EncodedSequence::nucleotide(s).unwrap()
    }

    #[test]
    fn test_keys_distinguish_length() {
        // "A" and "AA" share all base bits, only the length differs
        assert_ne!(kmer_key(&dna(b"A")).unwrap(), kmer_key(&dna(b"AA")).unwrap());
        assert_eq!(kmer_key(&dna(b"GT")).unwrap(), (2u64 << 58) | 0b0111);
    }

    #[test]
    fn test_set_membership() {
        let mut set = ShortSequenceSet::new();
        assert!(set.insert(&dna(b"ACGTAC")).unwrap());
        assert!(!set.insert(&dna(b"ACGTAC")).unwrap());
        assert!(set.insert(&dna(b"")).unwrap());

        assert_eq!(set.len(), 2);
        assert!(set.contains(&dna(b"ACGTAC")));
        assert!(set.contains(&dna(b"")));
        assert!(!set.contains(&dna(b"ACGTAG")));
        assert!(!set.contains(&dna(b"ACGNAC")));
    }

    #[test]
    fn test_unkeyable_sequences() {
        let mut set = ShortSequenceSet::new();
        assert!(set.insert(&dna(b"ACN")).is_err());
        assert!(set.insert(&dna(&[b'A'; 30])).is_err());
        assert!(set.insert(&EncodedSequence::amino_acid(b"ACD").unwrap()).is_err());
        assert!(set.insert(&dna(&[b'T'; 29])).unwrap());
    }
}
