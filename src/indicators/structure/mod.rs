//! Market structure: support/resistance and range bands

pub mod support_resistance;

pub use support_resistance::*;
