//! Record storage and wire formats
//!
//! This module defines the records that travel through the pipeline, along
//! with their binary wire form (`formats`) and the checksummed compressed
//! blocks that wrap groups of them (`compression`).

pub mod compression;
pub mod formats;

use crate::engines::compute::alignment::AlignmentResult;
use crate::modules::seq::QualifiedSequence;

/// A read travelling through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRecord {
    /// Read identifier
    pub id: String,
    /// Sequence and qualities
    pub read: QualifiedSequence,
    /// Name of the reference this read should be aligned against
    pub reference: Option<String>,
}

impl PipelineRecord {
    /// Create a record without a reference tag
    pub fn new(id: impl Into<String>, read: QualifiedSequence) -> Self {
        Self {
            id: id.into(),
            read,
            reference: None,
        }
    }

    /// Attach a reference tag
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Alignment result keyed by the read it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedRecord {
    pub id: String,
    pub result: AlignmentResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::seq::Alphabet;

    #[test]
    fn test_record_builder() {
        let read =
            QualifiedSequence::from_fastq_parts(Alphabet::Nucleotide, b"ACGT", b"IIII").unwrap();
        let record = PipelineRecord::new("read/1", read.clone()).with_reference("chrM");

        assert_eq!(record.id, "read/1");
        assert_eq!(record.read, read);
        assert_eq!(record.reference.as_deref(), Some("chrM"));
        assert_eq!(PipelineRecord::new("read/1", read).reference, None);
    }
}
