use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::Session;

/// Durable snapshot of a session after a committed transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u64,
    pub written_at: DateTime<Utc>,
    pub session: Session,
}

impl Checkpoint {
    pub fn of(session: &Session) -> Self {
        Self {
            version: session.revision,
            written_at: Utc::now(),
            session: session.clone(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn is_terminal(&self) -> bool {
        self.session.state.is_terminal()
    }
}
