//! Substitution scoring with affine gaps
//!
//! A scoring scheme is a full `size × size` substitution matrix over the
//! codes of one alphabet plus gap-open and gap-extend penalties. Schemes are
//! immutable once built and are shared across workers behind an `Arc`.

use serde::{Deserialize, Serialize};

use super::{ComputeError, ComputeResult};
use crate::modules::seq::Alphabet;

/// Score of a stop codon against any residue
const BLOSUM62_STOP: i32 = -4;
/// Score of a stop codon against itself
const BLOSUM62_STOP_SELF: i32 = 1;
/// Score of the unknown residue `X` against any residue (itself included)
const BLOSUM62_UNKNOWN: i32 = -1;

/// Residue order of the published BLOSUM62 table
const BLOSUM62_ORDER: &[u8] = b"ARNDCQEGHILKMFPSTWYV";

#[rustfmt::skip]
const BLOSUM62: [[i8; 20]; 20] = [
    // A   R   N   D   C   Q   E   G   H   I   L   K   M   F   P   S   T   W   Y   V
    [  4, -1, -2, -2,  0, -1, -1,  0, -2, -1, -1, -1, -1, -2, -1,  1,  0, -3, -2,  0], // A
    [ -1,  5,  0, -2, -3,  1,  0, -2,  0, -3, -2,  2, -1, -3, -2, -1, -1, -3, -2, -3], // R
    [ -2,  0,  6,  1, -3,  0,  0,  0,  1, -3, -3,  0, -2, -3, -2,  1,  0, -4, -2, -3], // N
    [ -2, -2,  1,  6, -3,  0,  2, -1, -1, -3, -4, -1, -3, -3, -1,  0, -1, -4, -3, -3], // D
    [  0, -3, -3, -3,  9, -3, -4, -3, -3, -1, -1, -3, -1, -2, -3, -1, -1, -2, -2, -1], // C
    [ -1,  1,  0,  0, -3,  5,  2, -2,  0, -3, -2,  1,  0, -3, -1,  0, -1, -2, -1, -2], // Q
    [ -1,  0,  0,  2, -4,  2,  5, -2,  0, -3, -3,  1, -2, -3, -1,  0, -1, -3, -2, -2], // E
    [  0, -2,  0, -1, -3, -2, -2,  6, -2, -4, -4, -2, -3, -3, -2,  0, -2, -2, -3, -3], // G
    [ -2,  0,  1, -1, -3,  0,  0, -2,  8, -3, -3, -1, -2, -1, -2, -1, -2, -2,  2, -3], // H
    [ -1, -3, -3, -3, -1, -3, -3, -4, -3,  4,  2, -3,  1,  0, -3, -2, -1, -3, -1,  3], // I
    [ -1, -2, -3, -4, -1, -2, -3, -4, -3,  2,  4, -2,  2,  0, -3, -2, -1, -2, -1,  1], // L
    [ -1,  2,  0, -1, -3,  1,  1, -2, -1, -3, -2,  5, -1, -3, -1,  0, -1, -3, -2, -2], // K
    [ -1, -1, -2, -3, -1,  0, -2, -3, -2,  1,  2, -1,  5,  0, -2, -1, -1, -1, -1,  1], // M
    [ -2, -3, -3, -3, -2, -3, -3, -3, -1,  0,  0, -3,  0,  6, -4, -2, -2,  1,  3, -1], // F
    [ -1, -2, -2, -1, -3, -1, -1, -2, -2, -3, -3, -1, -2, -4,  7, -1, -1, -4, -3, -2], // P
    [  1, -1,  1,  0, -1,  0,  0,  0, -1, -2, -2,  0, -1, -2, -1,  4,  1, -3, -2, -2], // S
    [  0, -1,  0, -1, -1, -1, -1, -2, -2, -1, -1, -1, -1, -2, -1,  1,  5, -2, -2,  0], // T
    [ -3, -3, -4, -4, -2, -2, -3, -2, -2, -3, -2, -3, -1,  1, -4, -3, -2, 11,  2, -3], // W
    [ -2, -2, -2, -3, -2, -1, -2, -3,  2, -1, -1, -2, -1,  3, -3, -2, -2,  2,  7, -1], // Y
    [  0, -3, -3, -3, -1, -2, -2, -3, -3,  3,  1, -2,  1, -1, -2, -2,  0, -3, -1,  4], // V
];

/// Substitution matrix plus affine gap penalties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringScheme {
    alphabet: Alphabet,
    matrix: Vec<i32>,
    gap_open: i32,
    gap_extend: i32,
}

impl ScoringScheme {
    /// Nucleotide scheme with uniform match and mismatch scores
    ///
    /// A pair involving an ambiguity code scores the rounded mean over all
    /// pairs of basic bases the two codes may stand for.
    pub fn nucleotide(
        match_score: i32,
        mismatch: i32,
        gap_open: i32,
        gap_extend: i32,
    ) -> ComputeResult<Self> {
        let matrix = expand_wildcards(Alphabet::Nucleotide, |a, b| {
            if a == b {
                match_score
            } else {
                mismatch
            }
        });
        Self::from_matrix(Alphabet::Nucleotide, matrix, gap_open, gap_extend)
    }

    /// Amino acid scheme with uniform match and mismatch scores
    pub fn amino_acid_identity(
        match_score: i32,
        mismatch: i32,
        gap_open: i32,
        gap_extend: i32,
    ) -> ComputeResult<Self> {
        let matrix = expand_wildcards(Alphabet::AminoAcid, |a, b| {
            if a == b {
                match_score
            } else {
                mismatch
            }
        });
        Self::from_matrix(Alphabet::AminoAcid, matrix, gap_open, gap_extend)
    }

    /// BLOSUM62 amino acid scheme
    pub fn blosum62(gap_open: i32, gap_extend: i32) -> ComputeResult<Self> {
        let alphabet = Alphabet::AminoAcid;
        let size = alphabet.size();
        let stop = alphabet.basic_size() - 1;

        // Row of each of our residue codes in the published table
        let rows: Vec<Option<usize>> = alphabet
            .symbols()
            .iter()
            .map(|symbol| BLOSUM62_ORDER.iter().position(|s| s == symbol))
            .collect();

        let mut matrix = vec![0; size * size];
        for a in 0..size {
            for b in 0..size {
                matrix[a * size + b] = match (rows[a], rows[b]) {
                    (Some(ra), Some(rb)) => BLOSUM62[ra][rb] as i32,
                    _ if a == stop && b == stop => BLOSUM62_STOP_SELF,
                    _ if a == stop || b == stop => BLOSUM62_STOP,
                    _ => BLOSUM62_UNKNOWN,
                };
            }
        }
        Self::from_matrix(alphabet, matrix, gap_open, gap_extend)
    }

    /// Build from a full row-major `size × size` matrix over the alphabet codes
    pub fn from_matrix(
        alphabet: Alphabet,
        matrix: Vec<i32>,
        gap_open: i32,
        gap_extend: i32,
    ) -> ComputeResult<Self> {
        let scheme = Self {
            alphabet,
            matrix,
            gap_open,
            gap_extend,
        };
        scheme.validate()?;
        Ok(scheme)
    }

    /// Check the matrix shape, symmetry and gap penalty signs
    pub fn validate(&self) -> ComputeResult<()> {
        let size = self.alphabet.size();
        if self.matrix.len() != size * size {
            return Err(ComputeError::InvalidScoring(format!(
                "{} matrix needs {} entries, got {}",
                self.alphabet,
                size * size,
                self.matrix.len()
            )));
        }
        for a in 0..size {
            for b in (a + 1)..size {
                if self.matrix[a * size + b] != self.matrix[b * size + a] {
                    return Err(ComputeError::InvalidScoring(format!(
                        "matrix is not symmetric at ({}, {})",
                        a, b
                    )));
                }
            }
        }
        if self.gap_open > 0 || self.gap_extend > 0 {
            return Err(ComputeError::InvalidScoring(format!(
                "gap penalties must not be positive (open {}, extend {})",
                self.gap_open, self.gap_extend
            )));
        }
        Ok(())
    }

    /// The alphabet this scheme scores
    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// Penalty for the first symbol of a gap
    pub fn gap_open(&self) -> i32 {
        self.gap_open
    }

    /// Penalty for every further symbol of a gap
    pub fn gap_extend(&self) -> i32 {
        self.gap_extend
    }

    /// Substitution score of two codes
    #[inline]
    pub fn score(&self, a: u8, b: u8) -> i32 {
        self.matrix[a as usize * self.alphabet.size() + b as usize]
    }

    /// Total penalty of a gap of `len` symbols
    pub fn gap_cost(&self, len: usize) -> i32 {
        match len {
            0 => 0,
            _ => self.gap_open + (len as i32 - 1) * self.gap_extend,
        }
    }
}

impl Default for ScoringScheme {
    /// +2 match, -1 mismatch, -2 gap open, -1 gap extend
    fn default() -> Self {
        let matrix = expand_wildcards(Alphabet::Nucleotide, |a, b| if a == b { 2 } else { -1 });
        Self {
            alphabet: Alphabet::Nucleotide,
            matrix,
            gap_open: -2,
            gap_extend: -1,
        }
    }
}

/// Fill a full matrix from a basic-code scorer, averaging over wildcards
fn expand_wildcards<F>(alphabet: Alphabet, basic: F) -> Vec<i32>
where
    F: Fn(usize, usize) -> i32,
{
    let size = alphabet.size();
    let members = |code: usize| -> Vec<usize> {
        let set = alphabet.matching_basic(code as u8);
        (0..alphabet.basic_size()).filter(|b| set & (1 << b) != 0).collect()
    };

    let basic = &basic;
    let mut matrix = vec![0; size * size];
    for a in 0..size {
        let left = members(a);
        for b in 0..size {
            let right = members(b);
            let count = (left.len() * right.len()) as i64;
            let sum: i64 = left
                .iter()
                .flat_map(|&x| right.iter().map(move |&y| basic(x, y) as i64))
                .sum();
            // Round half up, integer only
            matrix[a * size + b] = (2 * sum + count).div_euclid(2 * count) as i32;
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(alphabet: Alphabet, symbol: u8) -> u8 {
        alphabet.code_of(symbol).unwrap()
    }

    #[test]
    fn test_default_scheme() {
        let scheme = ScoringScheme::default();
        assert!(scheme.validate().is_ok());
        assert_eq!(scheme, ScoringScheme::nucleotide(2, -1, -2, -1).unwrap());

        let n = Alphabet::Nucleotide;
        assert_eq!(scheme.score(code(n, b'A'), code(n, b'A')), 2);
        assert_eq!(scheme.score(code(n, b'A'), code(n, b'T')), -1);
        assert_eq!(scheme.gap_cost(0), 0);
        assert_eq!(scheme.gap_cost(1), -2);
        assert_eq!(scheme.gap_cost(4), -5);
    }

    #[test]
    fn test_wildcard_scores_are_averaged() {
        let n = Alphabet::Nucleotide;
        let scheme = ScoringScheme::nucleotide(1, -1, -2, -1).unwrap();

        // N vs A: one match, three mismatches -> -0.5 rounds up to 0
        assert_eq!(scheme.score(code(n, b'N'), code(n, b'A')), 0);
        // R vs A: (1 - 1) / 2 = 0
        assert_eq!(scheme.score(code(n, b'R'), code(n, b'A')), 0);
        // N vs N: 4 matches out of 16 pairs -> -0.5 rounds up to 0
        assert_eq!(scheme.score(code(n, b'N'), code(n, b'N')), 0);
        // R vs Y share no base
        assert_eq!(scheme.score(code(n, b'R'), code(n, b'Y')), -1);
    }

    #[test]
    fn test_blosum62() {
        let aa = Alphabet::AminoAcid;
        let scheme = ScoringScheme::blosum62(-11, -1).unwrap();

        assert_eq!(scheme.score(code(aa, b'W'), code(aa, b'W')), 11);
        assert_eq!(scheme.score(code(aa, b'A'), code(aa, b'R')), -1);
        assert_eq!(scheme.score(code(aa, b'I'), code(aa, b'V')), 3);
        assert_eq!(scheme.score(code(aa, b'*'), code(aa, b'L')), -4);
        assert_eq!(scheme.score(code(aa, b'*'), code(aa, b'*')), 1);
        assert_eq!(scheme.score(code(aa, b'X'), code(aa, b'C')), -1);
        assert_eq!(scheme.score(code(aa, b'X'), code(aa, b'*')), -4);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            ScoringScheme::nucleotide(1, -1, 2, -1),
            Err(ComputeError::InvalidScoring(_))
        ));

        let short = ScoringScheme::from_matrix(Alphabet::Nucleotide, vec![0; 4], -1, -1);
        assert!(matches!(short, Err(ComputeError::InvalidScoring(_))));

        let size = Alphabet::Nucleotide.size();
        let mut skewed = vec![0; size * size];
        skewed[1] = 3;
        assert!(ScoringScheme::from_matrix(Alphabet::Nucleotide, skewed, -1, -1).is_err());
    }
}
