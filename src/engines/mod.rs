//! Processing engines
//!
//! `core` holds storage and concurrency primitives, `compute` the scoring
//! and alignment kernels, and `storage` the record and block wire formats.

pub mod compute;
pub mod core;
pub mod storage;

use thiserror::Error;

use crate::modules::seq::SequenceError;
use compute::ComputeError;

/// Error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Corrupt block: {0}")]
    CorruptBlock(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Worker panicked")]
    WorkerPanic,

    #[error("Pipeline failed: {0}")]
    PipelineFailure(Box<EngineError>),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
