//! Indicator math used by setup classification

pub mod math;
pub mod strength;
pub mod structure;
pub mod trend;
pub mod volatility;

pub use strength::*;
pub use structure::*;
pub use trend::*;
pub use volatility::*;
