//! Saved conversations
//!
//! A stored conversation is the active context plus the turn sequence of a
//! session at save time. Loading one seeds a session the same way setup does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContextConfiguration, ConversationTurn};

/// Maximum characters of the first user message used as a title
const TITLE_MAX_CHARS: usize = 60;

/// Persisted conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub context: ContextConfiguration,
    pub turns: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredConversation {
    /// Snapshot a session into a new stored conversation
    pub fn new(user_id: impl Into<String>, context: ContextConfiguration, turns: Vec<ConversationTurn>) -> Self {
        let now = Utc::now();
        let title = derive_title(&context, &turns);
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            title,
            context,
            turns,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            turn_count: self.turns.len(),
            updated_at: self.updated_at,
        }
    }
}

/// Listing entry for the history view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Title from the first user turn, falling back to cycle and modules
fn derive_title(context: &ContextConfiguration, turns: &[ConversationTurn]) -> String {
    if let Some(first) = turns.iter().find(|t| t.is_user()) {
        let line = first.text.lines().next().unwrap_or("").trim();
        if !line.is_empty() {
            let mut title: String = line.chars().take(TITLE_MAX_CHARS).collect();
            if line.chars().count() > TITLE_MAX_CHARS {
                title.push('…');
            }
            return title;
        }
    }

    let modules: Vec<&str> = context.selected_module_ids.iter().map(String::as_str).collect();
    if modules.is_empty() {
        format!("Planung {}", context.cycle)
    } else {
        format!("Planung {} ({})", context.cycle, modules.join(", "))
    }
}
