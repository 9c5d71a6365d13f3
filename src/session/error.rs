//! Session controller errors
//!
//! Turn-level failures never show up here; they become assistant turns.
//! These are the operations the controller refuses or cannot complete.

use thiserror::Error;

use super::Activity;
use crate::backend::BackendError;
use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No user is signed in")]
    NotSignedIn,

    #[error("No planning session is active")]
    NotActive,

    #[error("A planning session is already active; reset it first")]
    AlreadyActive,

    #[error("Session is busy ({0})")]
    Busy(Activity),

    #[error("There is no generated lesson plan to turn into an artifact")]
    NoAssistantTurn,

    #[error("Artifact generation failed: {0}")]
    Artifact(#[source] LlmError),

    #[error("Artifact export failed: {0}")]
    Export(#[source] BackendError),

    #[error("Conversation storage failed: {0}")]
    Persistence(#[source] BackendError),
}

impl SessionError {
    /// True when retrying after the current activity finishes may succeed
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionError::Busy(_))
    }
}
