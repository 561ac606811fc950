//! Motif search
//!
//! Bit-parallel (shift-and) matching of short motifs against encoded
//! sequences. A motif position accepts a sequence symbol when every basic
//! symbol the sequence symbol may stand for is also allowed by the motif, so
//! `N` in a motif matches anything while `N` in the sequence only matches an
//! `N` motif position.
//!
//! Positions can be marked exact: substitution search never mismatches
//! them. Indel-tolerant search uses the Wu-Manber recurrence and reports
//! either match ends or match starts.

use std::ops::Range;

use super::alphabet::Alphabet;
use super::sequence::{check_range, EncodedSequence, SequenceError, SequenceResult};

/// Longest supported motif
pub const MAX_MOTIF_LENGTH: usize = 64;

/// A match of a motif
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MotifHit {
    /// Position of the first matched symbol
    pub start: usize,
    /// Number of substituted positions
    pub substitutions: usize,
}

/// A match found by indel-tolerant search
///
/// `position` is the exclusive end of the match for
/// [`Motif::find_all_with_indels`] and the start of the match for
/// [`Motif::find_all_with_indels_from_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndelHit {
    pub position: usize,
    /// Substitutions, insertions and deletions combined
    pub errors: usize,
}

/// Compiled search motif
#[derive(Debug, Clone)]
pub struct Motif {
    alphabet: Alphabet,
    len: usize,
    /// Basic codes allowed at each position
    allowed: Vec<u32>,
    /// Per code, the positions accepting it
    masks: Vec<u64>,
    /// Positions that may not be substituted
    exact: u64,
}

impl Motif {
    /// Compile a motif from an encoded sequence
    pub fn new(pattern: &EncodedSequence) -> SequenceResult<Self> {
        let len = pattern.len();
        if len == 0 || len > MAX_MOTIF_LENGTH {
            return Err(SequenceError::InvalidMotif(format!(
                "length {} is outside 1..={}",
                len, MAX_MOTIF_LENGTH
            )));
        }

        let alphabet = pattern.alphabet();
        let allowed: Vec<u32> = pattern.codes().map(|code| alphabet.matching_basic(code)).collect();
        Ok(Self::from_allowed(alphabet, allowed, 0))
    }

    fn from_allowed(alphabet: Alphabet, allowed: Vec<u32>, exact: u64) -> Self {
        let masks = (0..alphabet.size() as u8)
            .map(|code| {
                let set = alphabet.matching_basic(code);
                allowed
                    .iter()
                    .enumerate()
                    .filter(|&(_, &accepts)| set != 0 && set & !accepts == 0)
                    .fold(0u64, |mask, (j, _)| mask | 1 << j)
            })
            .collect();

        Self {
            alphabet,
            len: allowed.len(),
            allowed,
            masks,
            exact,
        }
    }

    /// Compile a motif from raw symbols
    pub fn from_symbols(alphabet: Alphabet, symbols: &[u8]) -> SequenceResult<Self> {
        Self::new(&EncodedSequence::encode(alphabet, symbols)?)
    }

    /// Mark positions that substitution search must match exactly
    pub fn with_exact_positions<I>(mut self, positions: I) -> SequenceResult<Self>
    where
        I: IntoIterator<Item = usize>,
    {
        for position in positions {
            if position >= self.len {
                return Err(SequenceError::InvalidMotif(format!(
                    "exact position {} is outside a motif of length {}",
                    position, self.len
                )));
            }
            self.exact |= 1 << position;
        }
        Ok(self)
    }

    /// Motif length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty motifs are rejected
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// Exact positions as a bit set, bit `j` for position `j`
    pub fn exact_positions(&self) -> u64 {
        self.exact
    }

    /// Whether `position` accepts the sequence code `code`
    pub fn allows(&self, code: u8, position: usize) -> bool {
        position < self.len && self.mask(code) & (1 << position) != 0
    }

    /// Number of basic codes allowed at `position`
    pub fn allowed_basic_count(&self, position: usize) -> usize {
        self.allowed.get(position).map_or(0, |set| set.count_ones() as usize)
    }

    /// Union of two motifs of equal length; each position accepts what
    /// either motif accepts there
    ///
    /// Exact positions are combined too.
    pub fn or(&self, other: &Motif) -> SequenceResult<Motif> {
        if self.alphabet != other.alphabet {
            return Err(SequenceError::AlphabetMismatch {
                left: self.alphabet,
                right: other.alphabet,
            });
        }
        if self.len != other.len {
            return Err(SequenceError::InvalidMotif(format!(
                "cannot combine motifs of lengths {} and {}",
                self.len, other.len
            )));
        }

        let allowed = self.allowed.iter().zip(&other.allowed).map(|(a, b)| a | b).collect();
        Ok(Self::from_allowed(self.alphabet, allowed, self.exact | other.exact))
    }

    fn check_target(&self, sequence: &EncodedSequence, range: &Range<usize>) -> SequenceResult<()> {
        if sequence.alphabet() != self.alphabet {
            return Err(SequenceError::AlphabetMismatch {
                left: self.alphabet,
                right: sequence.alphabet(),
            });
        }
        check_range(range, sequence.len())
    }

    fn check_errors(&self, max_errors: usize) -> SequenceResult<()> {
        if max_errors >= self.len {
            return Err(SequenceError::InvalidMotif(format!(
                "{} errors allowed in a motif of length {}",
                max_errors, self.len
            )));
        }
        Ok(())
    }

    #[inline]
    fn mask(&self, code: u8) -> u64 {
        self.masks.get(code as usize).copied().unwrap_or(0)
    }

    #[inline]
    fn accept_bit(&self) -> u64 {
        1u64 << (self.len - 1)
    }

    /// Whether the motif matches `sequence` exactly at `start`
    pub fn matches(&self, sequence: &EncodedSequence, start: usize) -> SequenceResult<bool> {
        let end = start.saturating_add(self.len);
        self.check_target(sequence, &(start..end))?;
        Ok((start..end)
            .enumerate()
            .all(|(j, i)| sequence.code_at(i).map_or(false, |code| self.allows(code, j))))
    }

    /// First exact occurrence fully inside `range`
    pub fn find(
        &self,
        sequence: &EncodedSequence,
        range: Range<usize>,
    ) -> SequenceResult<Option<usize>> {
        self.check_target(sequence, &range)?;

        let accept = self.accept_bit();
        let mut state = 0u64;
        for i in range {
            let code = sequence.code_at(i).unwrap_or(u8::MAX);
            state = ((state << 1) | 1) & self.mask(code);
            if state & accept != 0 {
                return Ok(Some(i + 1 - self.len));
            }
        }
        Ok(None)
    }

    /// All occurrences inside `range` with at most `max_substitutions`
    /// mismatched positions
    ///
    /// Each start position is reported once, with the lowest substitution
    /// count it can be matched with. Exact positions never count as
    /// substitutions; an occurrence mismatching one is not reported.
    pub fn find_all(
        &self,
        sequence: &EncodedSequence,
        range: Range<usize>,
        max_substitutions: usize,
    ) -> SequenceResult<Vec<MotifHit>> {
        self.check_target(sequence, &range)?;
        self.check_errors(max_substitutions)?;

        let accept = self.accept_bit();
        let mut states = vec![0u64; max_substitutions + 1];
        // Tracks only the exact positions; everything else accepts any code
        let mut exact_state = 0u64;
        let mut hits = Vec::new();

        for i in range {
            let mask = self.mask(sequence.code_at(i).unwrap_or(u8::MAX));
            let mut previous = states[0];
            states[0] = ((previous << 1) | 1) & mask;
            for d in 1..states.len() {
                let current = states[d];
                states[d] = (((current << 1) | 1) & mask) | ((previous << 1) | 1);
                previous = current;
            }
            exact_state = ((exact_state << 1) | 1) & (mask | !self.exact);

            if exact_state & accept == 0 {
                continue;
            }
            if let Some(substitutions) = states.iter().position(|state| state & accept != 0) {
                hits.push(MotifHit {
                    start: i + 1 - self.len,
                    substitutions,
                });
            }
        }
        Ok(hits)
    }

    /// Indel-tolerant search reporting match ends
    ///
    /// Every exclusive end position inside `range` where the motif matches
    /// with at most `max_errors` substitutions, insertions and deletions is
    /// reported, with the lowest error count. Neighbouring ends of the same
    /// occurrence are all reported.
    pub fn find_all_with_indels(
        &self,
        sequence: &EncodedSequence,
        range: Range<usize>,
        max_errors: usize,
    ) -> SequenceResult<Vec<IndelHit>> {
        self.check_indel_search(sequence, &range, max_errors)?;

        let codes = range.clone().map(|i| (i + 1, sequence.code_at(i).unwrap_or(u8::MAX)));
        Ok(self.wu_manber(codes, max_errors, |code| self.mask(code)))
    }

    /// Indel-tolerant search reporting match starts
    ///
    /// The sequence is scanned from the end of `range` backwards against the
    /// reversed motif. Hits come out in descending start order.
    pub fn find_all_with_indels_from_start(
        &self,
        sequence: &EncodedSequence,
        range: Range<usize>,
        max_errors: usize,
    ) -> SequenceResult<Vec<IndelHit>> {
        self.check_indel_search(sequence, &range, max_errors)?;

        let reversed: Vec<u64> = self
            .masks
            .iter()
            .map(|mask| mask.reverse_bits() >> (u64::BITS as usize - self.len))
            .collect();
        let codes = range.clone().rev().map(|i| (i, sequence.code_at(i).unwrap_or(u8::MAX)));
        Ok(self.wu_manber(codes, max_errors, |code| {
            reversed.get(code as usize).copied().unwrap_or(0)
        }))
    }

    fn check_indel_search(
        &self,
        sequence: &EncodedSequence,
        range: &Range<usize>,
        max_errors: usize,
    ) -> SequenceResult<()> {
        self.check_target(sequence, range)?;
        self.check_errors(max_errors)?;
        if self.exact != 0 {
            return Err(SequenceError::InvalidMotif(
                "exact positions are not supported by indel-tolerant search".to_string(),
            ));
        }
        Ok(())
    }

    fn wu_manber<I, M>(&self, codes: I, max_errors: usize, mask_of: M) -> Vec<IndelHit>
    where
        I: Iterator<Item = (usize, u8)>,
        M: Fn(u8) -> u64,
    {
        let accept = self.accept_bit();
        // R_d starts with its first d positions deleted
        let mut states: Vec<u64> = (0..=max_errors).map(|d| (1u64 << d) - 1).collect();
        let mut hits = Vec::new();

        for (position, code) in codes {
            let mask = mask_of(code);
            let mut previous = states[0];
            states[0] = ((previous << 1) | 1) & mask;
            for d in 1..states.len() {
                let current = states[d];
                states[d] = (((current << 1) | 1) & mask)
                    | ((previous << 1) | 1)
                    | previous
                    | ((states[d - 1] << 1) | 1);
                previous = current;
            }

            if let Some(errors) = states.iter().position(|state| state & accept != 0) {
                hits.push(IndelHit { position, errors });
            }
        }
        hits
    }

    /// Bit score of a perfect match on basic symbols
    ///
    /// Each position contributes `log2(basic_size / allowed)`, so a fully
    /// degenerate position contributes nothing.
    pub fn match_bit_score(&self) -> f64 {
        (0..self.len).map(|j| self.match_cost(self.allowed_basic_count(j))).sum()
    }

    /// Bit score of the ungapped placement of the motif at `start`
    ///
    /// Matching positions score as in [`Motif::match_bit_score`]. A
    /// sequence wildcard only matches a position allowing all of its symbols,
    /// so it scores the same as a basic symbol there. Mismatches are
    /// penalised by the full alphabet cost and a length term. A mismatch at
    /// an exact position makes the score negative infinity.
    pub fn bit_score(&self, sequence: &EncodedSequence, start: usize) -> SequenceResult<f64> {
        let end = start.saturating_add(self.len);
        self.check_target(sequence, &(start..end))?;

        let free = self.len - self.exact.count_ones() as usize;
        let length_penalty = (free.max(1) as f64).ln();
        let max_cost = self.match_cost(1);

        let mut score = 0.0;
        for (j, i) in (start..end).enumerate() {
            let code = sequence.code_at(i).unwrap_or(u8::MAX);
            let allowed = self.allowed_basic_count(j);
            score += if self.allows(code, j) {
                self.match_cost(allowed)
            } else if self.exact & (1 << j) != 0 {
                f64::NEG_INFINITY
            } else {
                self.match_cost(allowed) - length_penalty - max_cost
            };
        }
        Ok(score)
    }

    #[inline]
    fn match_cost(&self, allowed: usize) -> f64 {
        (self.alphabet.basic_size() as f64).log2() - (allowed.max(1) as f64).log2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dna(s: &[u8]) -> EncodedSequence {
        EncodedSequence::nucleotide(s).unwrap()
    }

    fn positions(hits: &[IndelHit]) -> Vec<(usize, usize)> {
        hits.iter().map(|hit| (hit.position, hit.errors)).collect()
    }

    #[test]
    fn test_exact_find() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"ACGT").unwrap();
        let target = dna(b"TTACGTAACGT");
        assert_eq!(motif.find(&target, 0..target.len()).unwrap(), Some(2));
        assert_eq!(motif.find(&target, 3..target.len()).unwrap(), Some(7));
        // The occurrence at 7 ends past the searched range
        assert_eq!(motif.find(&target, 3..10).unwrap(), None);
    }

    #[test]
    fn test_wildcards_are_one_directional() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"ACN").unwrap();
        assert_eq!(motif.find(&dna(b"GACG"), 0..4).unwrap(), Some(1));

        let strict = Motif::from_symbols(Alphabet::Nucleotide, b"ACG").unwrap();
        assert_eq!(strict.find(&dna(b"GACN"), 0..4).unwrap(), None);

        // R (A or G) in the sequence fits an R or N motif position
        let purine = Motif::from_symbols(Alphabet::Nucleotide, b"RN").unwrap();
        assert_eq!(purine.find(&dna(b"CRT"), 0..3).unwrap(), Some(1));
    }

    #[test]
    fn test_substitution_tolerant_search() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"ACGT").unwrap();
        let target = dna(b"TTACCTAA");

        assert_eq!(
            motif.find_all(&target, 0..target.len(), 1).unwrap(),
            vec![MotifHit { start: 2, substitutions: 1 }]
        );
        assert!(motif.find_all(&target, 0..target.len(), 0).unwrap().is_empty());

        let exact = motif.find_all(&dna(b"ACGTACGT"), 0..8, 2).unwrap();
        assert!(exact.contains(&MotifHit { start: 0, substitutions: 0 }));
        assert!(exact.contains(&MotifHit { start: 4, substitutions: 0 }));
    }

    #[test]
    fn test_exact_positions_reject_substitutions() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"ACGT").unwrap();
        let target = dna(b"TTACCTAA");

        // The substitution at motif position 2 is no longer allowed
        let pinned = motif.clone().with_exact_positions([2]).unwrap();
        assert!(pinned.find_all(&target, 0..target.len(), 1).unwrap().is_empty());

        // Pinning other positions leaves the hit in place
        let loose = motif.with_exact_positions([0, 3]).unwrap();
        assert_eq!(
            loose.find_all(&target, 0..target.len(), 1).unwrap(),
            vec![MotifHit { start: 2, substitutions: 1 }]
        );
        assert_eq!(loose.exact_positions(), 0b1001);

        assert!(matches!(
            Motif::from_symbols(Alphabet::Nucleotide, b"AC")
                .unwrap()
                .with_exact_positions([2]),
            Err(SequenceError::InvalidMotif(_))
        ));
    }

    #[test]
    fn test_or_unions_positions() {
        let left = Motif::from_symbols(Alphabet::Nucleotide, b"ACG").unwrap();
        let right = Motif::from_symbols(Alphabet::Nucleotide, b"ATG").unwrap();
        let either = left.or(&right).unwrap();

        assert!(either.matches(&dna(b"ACG"), 0).unwrap());
        assert!(either.matches(&dna(b"ATG"), 0).unwrap());
        assert!(!either.matches(&dna(b"AGG"), 0).unwrap());
        // C or T is Y, so a Y in the sequence now fits
        assert!(either.matches(&dna(b"AYG"), 0).unwrap());
        assert_eq!(either.allowed_basic_count(1), 2);

        let short = Motif::from_symbols(Alphabet::Nucleotide, b"AC").unwrap();
        assert!(left.or(&short).is_err());
    }

    #[test]
    fn test_matches_checks_bounds() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"GT").unwrap();
        let target = dna(b"AGT");
        assert!(motif.matches(&target, 1).unwrap());
        assert!(!motif.matches(&target, 0).unwrap());
        assert!(matches!(
            motif.matches(&target, 2),
            Err(SequenceError::RangeError { .. })
        ));
        assert!(motif.allows(3, 1));
        assert!(!motif.allows(3, 2));
    }

    #[test]
    fn test_indel_search_reports_ends() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"ACGT").unwrap();

        // Exact occurrence ends at 6; the one-error neighbours end at 5 and 7
        let hits = motif.find_all_with_indels(&dna(b"TTACGTTT"), 0..8, 1).unwrap();
        assert_eq!(positions(&hits), vec![(5, 1), (6, 0), (7, 1)]);

        // A deleted G is one error
        let deletion = motif.find_all_with_indels(&dna(b"CCACTCC"), 0..7, 1).unwrap();
        assert!(deletion.contains(&IndelHit { position: 5, errors: 1 }));
        assert!(motif.find_all(&dna(b"CCACTCC"), 0..7, 1).unwrap().is_empty());

        // An inserted A is one error
        let insertion = motif.find_all_with_indels(&dna(b"CACAGTC"), 0..7, 1).unwrap();
        assert!(insertion.contains(&IndelHit { position: 6, errors: 1 }));

        // Nothing matches without errors
        assert!(motif.find_all_with_indels(&dna(b"CCACTCC"), 0..7, 0).unwrap().is_empty());
    }

    #[test]
    fn test_indel_search_reports_starts() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"ACGT").unwrap();
        let target = dna(b"TTACGTTT");

        let hits = motif.find_all_with_indels_from_start(&target, 0..8, 0).unwrap();
        assert_eq!(positions(&hits), vec![(2, 0)]);

        let hits = motif.find_all_with_indels_from_start(&target, 0..8, 1).unwrap();
        assert_eq!(positions(&hits), vec![(3, 1), (2, 0), (1, 1)]);

        // Deleted G: the occurrence starts at 2
        let deletion = motif.find_all_with_indels_from_start(&dna(b"CCACTCC"), 0..7, 1).unwrap();
        assert!(deletion.contains(&IndelHit { position: 2, errors: 1 }));
    }

    #[test]
    fn test_indel_search_rejects_exact_positions() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"ACGT")
            .unwrap()
            .with_exact_positions([0])
            .unwrap();
        assert!(matches!(
            motif.find_all_with_indels(&dna(b"ACGT"), 0..4, 1),
            Err(SequenceError::InvalidMotif(_))
        ));
        assert!(motif.find_all_with_indels_from_start(&dna(b"ACGT"), 0..4, 1).is_err());
    }

    #[test]
    fn test_bit_scores() {
        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"ACNR").unwrap();
        // 2 + 2 + 0 + 1 bits
        assert!((motif.match_bit_score() - 5.0).abs() < 1e-9);
        assert!((motif.bit_score(&dna(b"ACTG"), 0).unwrap() - 5.0).abs() < 1e-9);

        assert!((motif.bit_score(&dna(b"ACTR"), 0).unwrap() - 5.0).abs() < 1e-9);

        // Mismatch at position 1 scores 2 - ln(4) - 2 instead of 2
        let expected = 3.0 - 4f64.ln();
        assert!((motif.bit_score(&dna(b"AGTG"), 0).unwrap() - expected).abs() < 1e-9);
        // N does not fit an A position
        assert!((motif.bit_score(&dna(b"NCTG"), 0).unwrap() - expected).abs() < 1e-9);

        let pinned = motif.with_exact_positions([1]).unwrap();
        assert_eq!(pinned.bit_score(&dna(b"AGTG"), 0).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_invalid_motifs() {
        assert!(matches!(
            Motif::from_symbols(Alphabet::Nucleotide, b""),
            Err(SequenceError::InvalidMotif(_))
        ));
        assert!(Motif::from_symbols(Alphabet::Nucleotide, &[b'A'; 65]).is_err());
        assert!(Motif::from_symbols(Alphabet::Nucleotide, &[b'A'; 64]).is_ok());

        let motif = Motif::from_symbols(Alphabet::Nucleotide, b"AC").unwrap();
        assert!(motif.find_all(&dna(b"ACAC"), 0..4, 2).is_err());
        assert!(motif.find_all_with_indels(&dna(b"ACAC"), 0..4, 2).is_err());

        let protein = EncodedSequence::amino_acid(b"AC").unwrap();
        assert!(matches!(
            motif.find(&protein, 0..2),
            Err(SequenceError::AlphabetMismatch { .. })
        ));
    }

    #[test]
    fn test_long_motif_uses_top_bit() {
        let mut symbols = vec![b'A'; 63];
        symbols.push(b'T');
        let motif = Motif::from_symbols(Alphabet::Nucleotide, &symbols).unwrap();

        let mut target = vec![b'C'; 5];
        target.extend_from_slice(&symbols);
        let target = dna(&target);
        assert_eq!(motif.find(&target, 0..target.len()).unwrap(), Some(5));
        assert_eq!(
            positions(&motif.find_all_with_indels(&target, 0..target.len(), 0).unwrap()),
            vec![(target.len(), 0)]
        );
    }
}
