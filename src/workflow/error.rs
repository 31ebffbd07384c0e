use thiserror::Error;

use crate::models::SessionState;
use crate::store::StoreError;
use crate::workflow::approval::ApprovalError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("scan request has no instruments")]
    EmptyInstrumentSet,
    #[error("unknown session {0}")]
    SessionNotFound(String),
    #[error("session {0} is already terminal")]
    AlreadyTerminal(String),
    #[error("session {id} is {state}, expected {expected}")]
    WrongState {
        id: String,
        state: SessionState,
        expected: SessionState,
    },
    #[error("session {0} has no deliverable alerts left: every remaining alert was rejected by the sink")]
    NothingToRedeliver(String),
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
