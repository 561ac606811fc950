//! Domain value types

pub mod seq;
