//! Sequence module
//!
//! This module provides the sequence value types: alphabets, packed
//! sequences, quality tracks and the quality-annotated read that pairs them.

pub mod alphabet;
pub mod kmer;
pub mod motif;
pub mod quality;
pub mod sequence;

use std::ops::Range;

/// Convenience re-exports
pub use alphabet::Alphabet;
pub use kmer::ShortSequenceSet;
pub use motif::{IndelHit, Motif, MotifHit};
pub use quality::{QualityTrack, WindowedMeans};
pub use sequence::{EncodedSequence, SequenceError, SequenceResult};

/// A sequence bound one-to-one to its quality track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedSequence {
    sequence: EncodedSequence,
    quality: QualityTrack,
}

impl QualifiedSequence {
    /// Pair a sequence with its qualities; lengths must agree
    pub fn new(sequence: EncodedSequence, quality: QualityTrack) -> SequenceResult<Self> {
        if sequence.len() != quality.len() {
            return Err(SequenceError::LengthMismatch {
                sequence: sequence.len(),
                quality: quality.len(),
            });
        }
        Ok(Self { sequence, quality })
    }

    /// Encode a read from raw symbols and Phred+33 qualities
    pub fn from_fastq_parts(
        alphabet: Alphabet,
        symbols: &[u8],
        phred33: &[u8],
    ) -> SequenceResult<Self> {
        Self::new(
            EncodedSequence::encode(alphabet, symbols)?,
            QualityTrack::from_phred33(phred33)?,
        )
    }

    /// The sequence
    pub fn sequence(&self) -> &EncodedSequence {
        &self.sequence
    }

    /// The quality track
    pub fn quality(&self) -> &QualityTrack {
        &self.quality
    }

    /// Number of positions
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Check if the read is empty
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Split back into sequence and quality
    pub fn into_parts(self) -> (EncodedSequence, QualityTrack) {
        (self.sequence, self.quality)
    }

    /// Copy both tracks over `range`
    pub fn slice(&self, range: Range<usize>) -> SequenceResult<Self> {
        Ok(Self {
            sequence: self.sequence.slice(range.clone())?,
            quality: self.quality.slice(range)?,
        })
    }

    /// Keep only the longest stretch with quality `>= threshold`
    pub fn trim(&self, threshold: u8) -> SequenceResult<Self> {
        self.slice(self.quality.trim(threshold))
    }

    /// Reverse complement the sequence and reverse the qualities
    pub fn reverse_complement(&self) -> SequenceResult<Self> {
        Ok(Self {
            sequence: self.sequence.reverse_complement()?,
            quality: self.quality.reversed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_is_rejected() {
        let sequence = EncodedSequence::nucleotide(b"ACGT").unwrap();
        let quality = QualityTrack::uniform(3, 30).unwrap();
        assert_eq!(
            QualifiedSequence::new(sequence, quality).unwrap_err(),
            SequenceError::LengthMismatch { sequence: 4, quality: 3 }
        );
    }

    #[test]
    fn test_trim_keeps_tracks_aligned() {
        let read = QualifiedSequence::from_fastq_parts(Alphabet::Nucleotide, b"ACGTAC", b"##IIII")
            .unwrap();
        let trimmed = read.trim(30).unwrap();
        assert_eq!(trimmed.sequence().decode_all(), b"GTAC");
        assert_eq!(trimmed.quality().as_slice(), &[40, 40, 40, 40]);

        let nothing = read.trim(60).unwrap();
        assert!(nothing.is_empty());
        assert!(nothing.quality().is_empty());
    }

    #[test]
    fn test_reverse_complement_reverses_quality() {
        let read =
            QualifiedSequence::from_fastq_parts(Alphabet::Nucleotide, b"AAC", b"!#I").unwrap();
        let rc = read.reverse_complement().unwrap();
        assert_eq!(rc.sequence().decode_all(), b"GTT");
        assert_eq!(rc.quality().as_slice(), &[40, 2, 0]);
    }
}
