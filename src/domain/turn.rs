//! Conversation turns
//!
//! Turns are immutable once created. Ids are UUIDv7 (timestamp-derived).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// Where the text of an assistant turn came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOrigin {
    /// Typed by the user or generated by the model
    Model,
    /// Written locally: welcome text, change summaries, failure notices
    Local,
}

/// One user message or one assistant response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub origin: TurnOrigin,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn build(sender: Sender, origin: TurnOrigin, text: String, thought: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            sender,
            text,
            thought,
            origin,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::build(Sender::User, TurnOrigin::Model, text.into(), None)
    }

    /// Assistant turn produced by the model
    pub fn assistant(text: impl Into<String>, thought: Option<String>) -> Self {
        Self::build(Sender::Assistant, TurnOrigin::Model, text.into(), thought)
    }

    /// Assistant turn written by the session itself
    pub fn local(text: impl Into<String>) -> Self {
        Self::build(Sender::Assistant, TurnOrigin::Local, text.into(), None)
    }

    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }

    /// True for assistant turns whose text came from the model
    pub fn is_generated(&self) -> bool {
        self.sender == Sender::Assistant && self.origin == TurnOrigin::Model
    }
}
