//! Session orchestration: state machine, approval gate and stage handlers

pub mod approval;
pub mod context;
pub mod engine;
pub mod error;
pub mod handlers;

pub use approval::{ApprovalError, ApprovalGate};
pub use context::WorkflowContext;
pub use engine::WorkflowEngine;
pub use error::WorkflowError;
