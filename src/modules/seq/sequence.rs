//! Encoded sequence type
//!
//! This module provides the packed, immutable sequence representation used
//! everywhere else in the crate.

use std::fmt;
use std::ops::Range;

use thiserror::Error;

use super::alphabet::Alphabet;
use crate::engines::core::memory::PackedCodes;

/// Error type for sequence operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Invalid {alphabet} symbol {symbol:?} at position {position}")]
    InvalidSymbol {
        alphabet: Alphabet,
        symbol: char,
        position: usize,
    },

    #[error("Invalid range {start}..{end} for length {len}")]
    RangeError { start: usize, end: usize, len: usize },

    #[error("Alphabet mismatch: {left} and {right}")]
    AlphabetMismatch { left: Alphabet, right: Alphabet },

    #[error("Operation {operation} not supported for {alphabet} sequences")]
    UnsupportedAlphabet {
        alphabet: Alphabet,
        operation: &'static str,
    },

    #[error("Invalid window size {window} for track of length {len}")]
    InvalidWindow { window: usize, len: usize },

    #[error("Sequence length {sequence} does not match quality length {quality}")]
    LengthMismatch { sequence: usize, quality: usize },

    #[error("Quality value {value} at position {position} is out of range")]
    InvalidQuality { value: u8, position: usize },

    #[error("Invalid motif: {0}")]
    InvalidMotif(String),
}

/// Result type for sequence operations
pub type SequenceResult<T> = Result<T, SequenceError>;

/// Check `range` against a sequence of length `len`
pub(crate) fn check_range(range: &Range<usize>, len: usize) -> SequenceResult<()> {
    if range.start > range.end || range.end > len {
        return Err(SequenceError::RangeError {
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}

/// An immutable, bit-packed sequence over one alphabet
///
/// Equality and hashing operate on the packed form: two sequences are equal
/// iff they share the alphabet and the symbol sequence.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EncodedSequence {
    alphabet: Alphabet,
    codes: PackedCodes,
}

impl EncodedSequence {
    /// Encode raw symbols
    pub fn encode(alphabet: Alphabet, symbols: &[u8]) -> SequenceResult<Self> {
        let mut codes = Vec::with_capacity(symbols.len());
        for (position, &symbol) in symbols.iter().enumerate() {
            let code = alphabet.code_of(symbol).ok_or(SequenceError::InvalidSymbol {
                alphabet,
                symbol: symbol as char,
                position,
            })?;
            codes.push(code);
        }
        Ok(Self::from_codes_unchecked(alphabet, codes))
    }

    /// Create a nucleotide sequence
    pub fn nucleotide(symbols: &[u8]) -> SequenceResult<Self> {
        Self::encode(Alphabet::Nucleotide, symbols)
    }

    /// Create an amino acid sequence
    pub fn amino_acid(symbols: &[u8]) -> SequenceResult<Self> {
        Self::encode(Alphabet::AminoAcid, symbols)
    }

    /// Empty sequence over `alphabet`
    pub fn empty(alphabet: Alphabet) -> Self {
        Self::from_codes_unchecked(alphabet, std::iter::empty())
    }

    /// Build from codes that are already known to be valid for `alphabet`
    pub(crate) fn from_codes_unchecked<I>(alphabet: Alphabet, codes: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        Self {
            alphabet,
            codes: PackedCodes::pack(codes, alphabet.bits_per_symbol()),
        }
    }

    /// Rebuild a sequence from its packed bytes, validating layout and codes
    pub fn from_packed(alphabet: Alphabet, len: usize, packed: Vec<u8>) -> Option<Self> {
        let codes = PackedCodes::from_raw(packed, len, alphabet.bits_per_symbol())?;
        let size = alphabet.size() as u8;
        if codes.iter().any(|code| code >= size) {
            return None;
        }
        Some(Self { alphabet, codes })
    }

    /// The sequence alphabet
    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// Number of symbols
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Check if the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The packed representation
    pub fn packed_bytes(&self) -> &[u8] {
        self.codes.as_bytes()
    }

    /// Code at `index`
    pub fn code_at(&self, index: usize) -> Option<u8> {
        (index < self.len()).then(|| self.codes.get(index))
    }

    /// Symbol at `index`
    pub fn symbol_at(&self, index: usize) -> Option<u8> {
        self.code_at(index).and_then(|code| self.alphabet.symbol_of(code))
    }

    /// Iterate over all codes
    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.codes.iter()
    }

    /// Unpack all codes into a vector
    pub fn to_codes(&self) -> Vec<u8> {
        self.codes.iter().collect()
    }

    /// Decode the symbols in `range`
    pub fn decode(&self, range: Range<usize>) -> SequenceResult<Vec<u8>> {
        check_range(&range, self.len())?;
        Ok(self
            .codes
            .iter_range(range.start, range.end)
            .filter_map(|code| self.alphabet.symbol_of(code))
            .collect())
    }

    /// Decode the whole sequence
    pub fn decode_all(&self) -> Vec<u8> {
        self.codes
            .iter()
            .filter_map(|code| self.alphabet.symbol_of(code))
            .collect()
    }

    /// Copy the symbols in `range` into a new sequence
    pub fn slice(&self, range: Range<usize>) -> SequenceResult<Self> {
        check_range(&range, self.len())?;
        if range.start == 0 && range.end == self.len() {
            return Ok(self.clone());
        }
        Ok(Self::from_codes_unchecked(
            self.alphabet,
            self.codes.iter_range(range.start, range.end),
        ))
    }

    /// Reverse complement of a nucleotide sequence
    pub fn reverse_complement(&self) -> SequenceResult<Self> {
        if self.alphabet != Alphabet::Nucleotide {
            return Err(SequenceError::UnsupportedAlphabet {
                alphabet: self.alphabet,
                operation: "reverse complement",
            });
        }

        let codes = (0..self.len())
            .rev()
            .map(|i| self.codes.get(i))
            .filter_map(|code| self.alphabet.complement(code));
        Ok(Self::from_codes_unchecked(self.alphabet, codes))
    }

    /// Concatenate two sequences over the same alphabet
    pub fn concat(&self, other: &Self) -> SequenceResult<Self> {
        if self.alphabet != other.alphabet {
            return Err(SequenceError::AlphabetMismatch {
                left: self.alphabet,
                right: other.alphabet,
            });
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(other.clone());
        }
        Ok(Self::from_codes_unchecked(
            self.alphabet,
            self.codes.iter().chain(other.codes.iter()),
        ))
    }

    /// Whether any symbol in `range` is an ambiguity code
    pub fn contains_wildcards_in(&self, range: Range<usize>) -> SequenceResult<bool> {
        check_range(&range, self.len())?;
        Ok(self
            .codes
            .iter_range(range.start, range.end)
            .any(|code| self.alphabet.is_wildcard(code)))
    }

    /// Whether the sequence contains any ambiguity code
    pub fn contains_wildcards(&self) -> bool {
        self.codes.iter().any(|code| self.alphabet.is_wildcard(code))
    }

    /// Heap bytes used by the packed symbols
    pub fn memory_usage(&self) -> usize {
        self.codes.memory_usage()
    }
}

impl fmt::Display for EncodedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in self.codes.iter() {
            let symbol = self.alphabet.symbol_of(code).unwrap_or(b'?');
            write!(f, "{}", symbol as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EncodedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedSequence({}, \"{}\")", self.alphabet, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_encode_decode() {
        let dna = EncodedSequence::nucleotide(b"ACGTNRYKM").unwrap();
        assert_eq!(dna.len(), 9);
        assert_eq!(dna.decode_all(), b"ACGTNRYKM");
        assert_eq!(dna.decode(2..5).unwrap(), b"GTN");
        assert_eq!(dna.decode(3..3).unwrap(), b"");
        assert_eq!(dna.memory_usage(), 5);

        let protein = EncodedSequence::amino_acid(b"MKV*X").unwrap();
        assert_eq!(protein.to_string(), "MKV*X");
        assert_eq!(protein.symbol_at(1), Some(b'K'));
        assert_eq!(protein.symbol_at(5), None);
    }

    #[test]
    fn test_invalid_symbol() {
        let err = EncodedSequence::nucleotide(b"ACGU").unwrap_err();
        assert_eq!(
            err,
            SequenceError::InvalidSymbol {
                alphabet: Alphabet::Nucleotide,
                symbol: 'U',
                position: 3,
            }
        );
        assert!(EncodedSequence::nucleotide(b"acgt").is_err());
    }

    #[test]
    fn test_range_errors() {
        let dna = EncodedSequence::nucleotide(b"ACGT").unwrap();
        assert!(matches!(dna.decode(3..2), Err(SequenceError::RangeError { .. })));
        assert!(matches!(dna.decode(0..5), Err(SequenceError::RangeError { .. })));
        assert!(matches!(dna.slice(5..5), Err(SequenceError::RangeError { .. })));
    }

    #[test]
    fn test_slice_is_independent_copy() {
        let dna = EncodedSequence::nucleotide(b"AACCGGTT").unwrap();
        let middle = dna.slice(2..6).unwrap();
        assert_eq!(middle, EncodedSequence::nucleotide(b"CCGG").unwrap());

        // Odd offsets repack symbols that straddled bytes in the parent
        let odd = dna.slice(1..4).unwrap();
        assert_eq!(odd.decode_all(), b"ACC");
        assert_eq!(odd.packed_bytes(), EncodedSequence::nucleotide(b"ACC").unwrap().packed_bytes());
    }

    #[test]
    fn test_reverse_complement() {
        let dna = EncodedSequence::nucleotide(b"AACGTRN").unwrap();
        let rc = dna.reverse_complement().unwrap();
        assert_eq!(rc.decode_all(), b"NYACGTT");

        let protein = EncodedSequence::amino_acid(b"MK").unwrap();
        assert!(matches!(
            protein.reverse_complement(),
            Err(SequenceError::UnsupportedAlphabet { .. })
        ));
    }

    #[test]
    fn test_concat() {
        let left = EncodedSequence::nucleotide(b"ACG").unwrap();
        let right = EncodedSequence::nucleotide(b"TTA").unwrap();
        assert_eq!(left.concat(&right).unwrap().decode_all(), b"ACGTTA");

        let protein = EncodedSequence::amino_acid(b"ACG").unwrap();
        assert_eq!(
            left.concat(&protein).unwrap_err(),
            SequenceError::AlphabetMismatch {
                left: Alphabet::Nucleotide,
                right: Alphabet::AminoAcid,
            }
        );
    }

    #[test]
    fn test_equality_respects_alphabet() {
        // "ACG" is valid in both alphabets but the sequences differ
        let dna = EncodedSequence::nucleotide(b"ACG").unwrap();
        let protein = EncodedSequence::amino_acid(b"ACG").unwrap();
        assert_ne!(dna, protein);

        let mut set = HashSet::new();
        set.insert(dna.clone());
        assert!(set.contains(&EncodedSequence::nucleotide(b"ACG").unwrap()));
        assert!(!set.contains(&protein));
    }

    #[test]
    fn test_wildcards() {
        let dna = EncodedSequence::nucleotide(b"ACGNT").unwrap();
        assert!(dna.contains_wildcards());
        assert!(!dna.contains_wildcards_in(0..3).unwrap());
        assert!(dna.contains_wildcards_in(2..4).unwrap());
    }

    #[test]
    fn test_from_packed_validates_codes() {
        let dna = EncodedSequence::nucleotide(b"ACGT").unwrap();
        let restored =
            EncodedSequence::from_packed(Alphabet::Nucleotide, 4, dna.packed_bytes().to_vec());
        assert_eq!(restored, Some(dna));

        // Code 15 is not a nucleotide
        assert_eq!(EncodedSequence::from_packed(Alphabet::Nucleotide, 2, vec![0xF0]), None);
    }

    fn nucleotide_strings() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(proptest::sample::select(b"AGCTNRYSWKMBDHV".to_vec()), 0..200)
    }

    fn amino_acid_strings() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(
            proptest::sample::select(b"ACDEFGHIKLMNPQRSTVWY*X".to_vec()),
            0..200,
        )
    }

    proptest! {
        #[test]
        fn prop_nucleotide_decode_inverts_encode(symbols in nucleotide_strings()) {
            let encoded = EncodedSequence::nucleotide(&symbols).unwrap();
            prop_assert_eq!(encoded.decode_all(), symbols);
        }

        #[test]
        fn prop_amino_acid_decode_inverts_encode(symbols in amino_acid_strings()) {
            let encoded = EncodedSequence::amino_acid(&symbols).unwrap();
            prop_assert_eq!(encoded.decode(0..symbols.len()).unwrap(), symbols);
        }

        #[test]
        fn prop_reverse_complement_is_involution(symbols in nucleotide_strings()) {
            let encoded = EncodedSequence::nucleotide(&symbols).unwrap();
            let twice = encoded.reverse_complement().unwrap().reverse_complement().unwrap();
            prop_assert_eq!(twice, encoded);
        }

        #[test]
        fn prop_slices_concat_to_parent(symbols in amino_acid_strings(), cut in 0usize..200) {
            let encoded = EncodedSequence::amino_acid(&symbols).unwrap();
            let cut = cut.min(encoded.len());
            let left = encoded.slice(0..cut).unwrap();
            let right = encoded.slice(cut..encoded.len()).unwrap();
            prop_assert_eq!(left.concat(&right).unwrap(), encoded);
        }
    }
}
