//! Setup detection: classification, per-kind risk rules and the analysis unit

pub mod classify;
pub mod risk;
pub mod unit;

pub use classify::{classify, ClassifierConfig};
pub use risk::{assess, risk_reward, screen, Levels};
pub use unit::{fetch_with_retry, AnalysisUnit, HistoryRequest, MarketAnalysisUnit};
