//! Core application primitives: cancellation, scheduling, runtime and HTTP

pub mod cancel;
pub mod http;
pub mod runtime;
pub mod scheduler;
pub mod trigger;

pub use cancel::CancelSignal;
pub use http::{create_router, start_server, AppState, HealthStatus};
pub use runtime::{RuntimeConfig, WorkflowRuntime};
pub use scheduler::AnalysisScheduler;
pub use trigger::ScanTrigger;
