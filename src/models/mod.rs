//! Shared data models spanning the engine layers.

pub mod alert;
pub mod analysis;
pub mod approval;
pub mod checkpoint;
pub mod indicators;
pub mod market;
pub mod session;
pub mod setup;

pub use alert::{Alert, AlertLevel, DeliveryRecord};
pub use analysis::AnalysisResult;
pub use approval::{ApprovalDecision, DecisionRequest, DecisionSource, TimeoutPolicy};
pub use checkpoint::Checkpoint;
pub use indicators::{AverageKind, MovingAverage, RelativeStrengthReading};
pub use market::{AssetClass, Bar, DateRange, Instrument, Interval};
pub use session::{Session, SessionId, SessionState};
pub use setup::{Direction, DiscardedSetup, Setup, SetupCandidate, SetupEvidence, SetupKind};
