//! Relative strength against a benchmark

pub mod relative_strength;

pub use relative_strength::*;
