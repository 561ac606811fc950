//! ngsflow
//!
//! Compact NGS read representation, affine-gap pairwise alignment and an
//! ordered, backpressured streaming pipeline that aligns reads in parallel.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ngsflow::{
//!     run_pipeline, AlignmentMode, EncodedSequence, MemorySink, PipelineConfig, ReadSource,
//!     ReferenceAligner, ScoringScheme,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default()
//!     .with_mode(AlignmentMode::SemiGlobal)
//!     .with_scoring(Arc::new(ScoringScheme::nucleotide(1, -1, -2, -1)?));
//! let processor = ReferenceAligner::new(config.aligner())
//!     .with_default_reference(EncodedSequence::nucleotide(b"ACGTTGCA")?)?;
//! let source = ReadSource::open("reads.bin")?;
//! let summary = run_pipeline(config, source, MemorySink::new(), processor)?;
//! println!("{} records aligned", summary.records_emitted);
//! # Ok(())
//! # }
//! ```

pub mod engines;
pub mod modules;

pub use engines::compute::alignment::{
    align, Aligner, AlignmentMode, AlignmentResult, EditOp, EditRun,
};
pub use engines::compute::scoring::ScoringScheme;
pub use engines::compute::{ComputeError, ComputeResult, RecordProcessor, ReferenceAligner};
pub use engines::core::io::{
    ByteSource, MemorySink, MmapSource, ReadSource, ResultSink, SinkStatus, WriteSink,
};
pub use engines::core::parallel::{
    run_pipeline, Pipeline, PipelineConfig, PipelineState, PipelineSummary, RecordErrorPolicy,
    RecordFailure,
    StopHandle,
};
pub use engines::storage::{AlignedRecord, PipelineRecord};
pub use engines::{EngineError, EngineResult};
pub use modules::seq::{
    Alphabet, EncodedSequence, IndelHit, Motif, MotifHit, QualifiedSequence, QualityTrack,
    SequenceError,
    SequenceResult, ShortSequenceSet,
};
