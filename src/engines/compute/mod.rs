//! Compute primitives for read processing
//!
//! This module provides the scoring schemes and alignment kernels, and the
//! `RecordProcessor` seam through which the pipeline runs them.

pub mod alignment;
pub mod scoring;

use std::collections::HashMap;

use crate::engines::storage::formats::serialize_alignment;
use crate::engines::storage::{AlignedRecord, PipelineRecord};
use crate::engines::EngineResult;
use crate::modules::seq::{EncodedSequence, SequenceError};
use alignment::Aligner;

/// Compute operation result type
pub type ComputeResult<T> = Result<T, ComputeError>;

/// Error types for compute operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComputeError {
    #[error("Alignment of an empty sequence")]
    EmptyInput,

    #[error("Invalid scoring scheme: {0}")]
    InvalidScoring(String),

    #[error("Invalid band width: {0}")]
    InvalidBand(usize),

    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),
}

/// Per-record work run by the pipeline workers
///
/// Implementations are shared by every worker thread and must not rely on
/// being called in record order.
pub trait RecordProcessor: Send + Sync {
    /// Turn one record into the payload handed to the sink
    fn process(&self, record: &PipelineRecord) -> EngineResult<Vec<u8>>;
}

impl<F> RecordProcessor for F
where
    F: Fn(&PipelineRecord) -> EngineResult<Vec<u8>> + Send + Sync,
{
    fn process(&self, record: &PipelineRecord) -> EngineResult<Vec<u8>> {
        self(record)
    }
}

/// Aligns every read against a named reference
///
/// A record's reference tag picks the reference; untagged records use the
/// default reference when one is set.
#[derive(Debug, Clone)]
pub struct ReferenceAligner {
    aligner: Aligner,
    references: HashMap<String, EncodedSequence>,
    default_reference: Option<EncodedSequence>,
}

impl ReferenceAligner {
    /// Create an aligner with no references
    pub fn new(aligner: Aligner) -> Self {
        Self {
            aligner,
            references: HashMap::new(),
            default_reference: None,
        }
    }

    fn check_alphabet(&self, sequence: &EncodedSequence) -> ComputeResult<()> {
        let expected = self.aligner.scoring().alphabet();
        if sequence.alphabet() != expected {
            return Err(SequenceError::AlphabetMismatch {
                left: expected,
                right: sequence.alphabet(),
            }
            .into());
        }
        Ok(())
    }

    /// Register a named reference
    pub fn with_reference(
        mut self,
        name: impl Into<String>,
        sequence: EncodedSequence,
    ) -> ComputeResult<Self> {
        self.check_alphabet(&sequence)?;
        self.references.insert(name.into(), sequence);
        Ok(self)
    }

    /// Set the reference used for untagged records
    pub fn with_default_reference(mut self, sequence: EncodedSequence) -> ComputeResult<Self> {
        self.check_alphabet(&sequence)?;
        self.default_reference = Some(sequence);
        Ok(self)
    }

    /// The underlying aligner
    pub fn aligner(&self) -> &Aligner {
        &self.aligner
    }

    /// Reference a record should be aligned against
    pub fn reference_for(&self, record: &PipelineRecord) -> ComputeResult<&EncodedSequence> {
        match &record.reference {
            Some(name) => self
                .references
                .get(name)
                .ok_or_else(|| ComputeError::UnknownReference(name.clone())),
            None => self
                .default_reference
                .as_ref()
                .ok_or_else(|| {
                    let reason = format!("no default reference for {}", record.id);
                    ComputeError::UnknownReference(reason)
                }),
        }
    }

    /// Align one record
    pub fn align_record(&self, record: &PipelineRecord) -> ComputeResult<AlignedRecord> {
        let reference = self.reference_for(record)?;
        let result = self.aligner.align(record.read.sequence(), reference)?;
        Ok(AlignedRecord {
            id: record.id.clone(),
            result,
        })
    }
}

impl RecordProcessor for ReferenceAligner {
    fn process(&self, record: &PipelineRecord) -> EngineResult<Vec<u8>> {
        let aligned = self.align_record(record)?;
        serialize_alignment(&aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::storage::formats::deserialize_alignment;
    use crate::engines::EngineError;
    use crate::modules::seq::{Alphabet, QualifiedSequence};
    use alignment::AlignmentMode;
    use scoring::ScoringScheme;
    use std::sync::Arc;

    fn read(id: &str, symbols: &[u8]) -> PipelineRecord {
        let quality = vec![b'I'; symbols.len()];
        PipelineRecord::new(
            id,
            QualifiedSequence::from_fastq_parts(Alphabet::Nucleotide, symbols, &quality).unwrap(),
        )
    }

    fn processor() -> ReferenceAligner {
        let scheme = Arc::new(ScoringScheme::nucleotide(1, -1, -2, -1).unwrap());
        ReferenceAligner::new(Aligner::new(scheme, AlignmentMode::SemiGlobal))
            .with_reference("chrA", EncodedSequence::nucleotide(b"TTTTACGTTTTT").unwrap())
            .unwrap()
            .with_default_reference(EncodedSequence::nucleotide(b"GGGGCCCCAAAA").unwrap())
            .unwrap()
    }

    #[test]
    fn test_reference_selection() {
        let processor = processor();

        let tagged = processor.align_record(&read("r1", b"TACGT").with_reference("chrA")).unwrap();
        assert_eq!(tagged.id, "r1");
        assert_eq!(tagged.result.score, 5);
        assert_eq!(tagged.result.reference_range, 3..8);

        let untagged = processor.align_record(&read("r2", b"CCAA")).unwrap();
        assert_eq!(untagged.result.score, 4);
        assert_eq!(untagged.result.reference_range, 6..10);
    }

    #[test]
    fn test_unknown_reference() {
        let processor = processor();
        assert_eq!(
            processor.align_record(&read("r1", b"ACGT").with_reference("chrZ")).unwrap_err(),
            ComputeError::UnknownReference("chrZ".to_string())
        );

        let bare = ReferenceAligner::new(Aligner::new(Arc::default(), AlignmentMode::Global));
        assert!(matches!(
            bare.align_record(&read("r1", b"ACGT")),
            Err(ComputeError::UnknownReference(_))
        ));
        assert!(bare
            .with_reference("p", EncodedSequence::amino_acid(b"MK").unwrap())
            .is_err());
    }

    #[test]
    fn test_processor_payload() {
        let processor = processor();
        let payload = processor.process(&read("r9", b"CCAA")).unwrap();
        let decoded = deserialize_alignment(&payload).unwrap();
        assert_eq!(decoded.id, "r9");
        assert_eq!(decoded.result.cigar(), "4=");

        let err = processor.process(&read("r9", b"CCAA").with_reference("nope")).unwrap_err();
        assert!(matches!(err, EngineError::Compute(ComputeError::UnknownReference(_))));
    }

    #[test]
    fn test_closures_are_processors() {
        let length = |record: &PipelineRecord| -> EngineResult<Vec<u8>> {
            Ok(vec![record.read.len() as u8])
        };
        assert_eq!(length.process(&read("r", b"ACG")).unwrap(), vec![3]);
    }
}
