//! Sequence alphabets
//!
//! Alphabets are a closed set: nucleotides (with IUPAC ambiguity codes) and
//! amino acids. Every per-alphabet property (bit width, symbol table,
//! complement table, wildcard sets) is looked up by variant from tables that
//! are built once per process and never mutated afterwards.

use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Marker for bytes that are not a symbol of the alphabet
const INVALID: u8 = 0xFF;

/// Nucleotide symbols in code order; codes below 4 are the basic bases
const NUCLEOTIDE_SYMBOLS: &[u8] = b"AGCTNRYSWKMBDHV";

/// Amino acid symbols in code order: 20 canonical residues, stop, unknown
const AMINO_ACID_SYMBOLS: &[u8] = b"ACDEFGHIKLMNPQRSTVWY*X";

/// Complement of each nucleotide code
const NUCLEOTIDE_COMPLEMENT: [u8; 15] = [3, 2, 1, 0, 4, 6, 5, 7, 8, 10, 9, 14, 13, 12, 11];

/// Basic bases matched by each nucleotide code (bit 0 = A, 1 = G, 2 = C, 3 = T)
const NUCLEOTIDE_MATCHES: [u32; 15] = [
    0b0001, 0b0010, 0b0100, 0b1000, // A G C T
    0b1111, // N
    0b0011, 0b1100, 0b0110, 0b1001, // R Y S W
    0b1010, 0b0101, // K M
    0b1110, 0b1011, 0b1101, 0b0111, // B D H V
];

static NUCLEOTIDE_CODES: Lazy<[u8; 256]> = Lazy::new(|| build_code_table(NUCLEOTIDE_SYMBOLS));
static AMINO_ACID_CODES: Lazy<[u8; 256]> = Lazy::new(|| build_code_table(AMINO_ACID_SYMBOLS));

fn build_code_table(symbols: &[u8]) -> [u8; 256] {
    let mut table = [INVALID; 256];
    for (code, &symbol) in symbols.iter().enumerate() {
        table[symbol as usize] = code as u8;
    }
    table
}

/// Sequence alphabet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Alphabet {
    /// A, C, G, T and the IUPAC ambiguity codes
    Nucleotide,
    /// The 20 canonical amino acids, stop (`*`) and unknown (`X`)
    AminoAcid,
}

impl Alphabet {
    /// Tag byte used by the wire format
    pub const fn tag(self) -> u8 {
        match self {
            Alphabet::Nucleotide => 0,
            Alphabet::AminoAcid => 1,
        }
    }

    /// Resolve a wire tag back to an alphabet
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Alphabet::Nucleotide),
            1 => Some(Alphabet::AminoAcid),
            _ => None,
        }
    }

    /// Minimal number of bits needed to store one symbol
    pub const fn bits_per_symbol(self) -> u8 {
        match self {
            Alphabet::Nucleotide => 4,
            Alphabet::AminoAcid => 5,
        }
    }

    /// Human readable name
    pub const fn name(self) -> &'static str {
        match self {
            Alphabet::Nucleotide => "nucleotide",
            Alphabet::AminoAcid => "amino acid",
        }
    }

    /// All symbols in code order
    pub fn symbols(self) -> &'static [u8] {
        match self {
            Alphabet::Nucleotide => NUCLEOTIDE_SYMBOLS,
            Alphabet::AminoAcid => AMINO_ACID_SYMBOLS,
        }
    }

    /// Number of codes in the alphabet
    pub fn size(self) -> usize {
        self.symbols().len()
    }

    /// Number of non-wildcard codes; they occupy codes `0..basic_size()`
    pub const fn basic_size(self) -> usize {
        match self {
            Alphabet::Nucleotide => 4,
            Alphabet::AminoAcid => 21,
        }
    }

    /// Map a symbol to its code
    #[inline]
    pub fn code_of(self, symbol: u8) -> Option<u8> {
        let code = match self {
            Alphabet::Nucleotide => NUCLEOTIDE_CODES[symbol as usize],
            Alphabet::AminoAcid => AMINO_ACID_CODES[symbol as usize],
        };
        (code != INVALID).then_some(code)
    }

    /// Map a code back to its symbol
    #[inline]
    pub fn symbol_of(self, code: u8) -> Option<u8> {
        self.symbols().get(code as usize).copied()
    }

    /// Whether `code` stands for more than one basic symbol
    #[inline]
    pub fn is_wildcard(self, code: u8) -> bool {
        (code as usize) >= self.basic_size()
    }

    /// Complement of a nucleotide code; `None` for amino acids or invalid codes
    #[inline]
    pub fn complement(self, code: u8) -> Option<u8> {
        match self {
            Alphabet::Nucleotide => NUCLEOTIDE_COMPLEMENT.get(code as usize).copied(),
            Alphabet::AminoAcid => None,
        }
    }

    /// Bit set of the basic codes that `code` may stand for
    pub fn matching_basic(self, code: u8) -> u32 {
        match self {
            Alphabet::Nucleotide => NUCLEOTIDE_MATCHES.get(code as usize).copied().unwrap_or(0),
            Alphabet::AminoAcid => {
                let code = code as usize;
                if code < self.basic_size() {
                    1 << code
                } else if code < self.size() {
                    // X: any residue or stop
                    (1u32 << self.basic_size()) - 1
                } else {
                    0
                }
            }
        }
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_tables_round_trip() {
        for alphabet in [Alphabet::Nucleotide, Alphabet::AminoAcid] {
            for (code, &symbol) in alphabet.symbols().iter().enumerate() {
                assert_eq!(alphabet.code_of(symbol), Some(code as u8));
                assert_eq!(alphabet.symbol_of(code as u8), Some(symbol));
            }
            assert!(alphabet.size() <= 1 << alphabet.bits_per_symbol());
        }

        assert_eq!(Alphabet::Nucleotide.code_of(b'a'), None);
        assert_eq!(Alphabet::Nucleotide.code_of(b'U'), None);
        assert_eq!(Alphabet::AminoAcid.code_of(b'B'), None);
    }

    #[test]
    fn test_complement_is_involution() {
        let alphabet = Alphabet::Nucleotide;
        for code in 0..alphabet.size() as u8 {
            let complement = alphabet.complement(code).unwrap();
            assert_eq!(alphabet.complement(complement), Some(code));
        }
        assert_eq!(Alphabet::AminoAcid.complement(0), None);
    }

    #[test]
    fn test_complement_matches_base_sets() {
        // Complementing swaps A<->T and G<->C in the matched base set
        let swap = |set: u32| {
            ((set & 0b0001) << 3)
                | ((set & 0b1000) >> 3)
                | ((set & 0b0010) << 1)
                | ((set & 0b0100) >> 1)
        };
        let alphabet = Alphabet::Nucleotide;
        for code in 0..alphabet.size() as u8 {
            let complement = alphabet.complement(code).unwrap();
            assert_eq!(alphabet.matching_basic(complement), swap(alphabet.matching_basic(code)));
        }
    }

    #[test]
    fn test_wildcards() {
        let n = Alphabet::Nucleotide;
        assert!(!n.is_wildcard(n.code_of(b'T').unwrap()));
        assert!(n.is_wildcard(n.code_of(b'N').unwrap()));
        assert_eq!(n.matching_basic(n.code_of(b'N').unwrap()).count_ones(), 4);

        let aa = Alphabet::AminoAcid;
        assert!(!aa.is_wildcard(aa.code_of(b'*').unwrap()));
        assert!(aa.is_wildcard(aa.code_of(b'X').unwrap()));
        assert_eq!(aa.matching_basic(aa.code_of(b'X').unwrap()).count_ones(), 21);
    }

    #[test]
    fn test_tags() {
        for alphabet in [Alphabet::Nucleotide, Alphabet::AminoAcid] {
            assert_eq!(Alphabet::from_tag(alphabet.tag()), Some(alphabet));
        }
        assert_eq!(Alphabet::from_tag(7), None);
    }
}
