//! Core engine primitives
//!
//! Packed storage buffers, the byte source and result sink boundaries, and
//! the ordered streaming pipeline built on them.

pub mod io;
pub mod memory;
pub mod parallel;
