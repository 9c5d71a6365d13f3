//! Prompt assembly
//!
//! Grounding text is built from the active context only: active uploaded
//! files (each bounded), curriculum text per selected module (bounded in
//! total), then cycle and wishes. Earlier turns are replayed as messages.

use tracing::{debug, warn};

use crate::backend::CurriculumSource;
use crate::config::SessionConfig;
use crate::domain::{ArtifactKind, ContextConfiguration, ConversationTurn, Sender};
use crate::llm::{CompletionRequest, Message, Role};

/// Appended wherever text was cut to fit a limit
pub const TRUNCATION_MARKER: &str = "[... Inhalt gekürzt ...]";

const SYSTEM_PREAMBLE: &str = "Du bist Mibuntu, ein KI-Assistent für Lehrpersonen in der Schweiz. \
Du planst Lektionen und Unterrichtseinheiten nach dem Lehrplan 21. Stütze dich auf die \
Lehrplanauszüge und Dokumente unten, wenn sie vorhanden sind, und nenne die Kompetenzen, \
auf die du dich beziehst. Antworte auf Deutsch und in Markdown. Wenn du vor der Antwort \
nachdenkst, schreibe deine Überlegungen in einen Block <thinking>...</thinking> am Anfang.";

const ARTIFACT_PREAMBLE: &str = "Du bist Mibuntu und erstellst Unterrichtsmaterial für Lehrpersonen \
in der Schweiz. Gib nur das fertige Dokument aus, ohne Einleitung oder Kommentar.";

/// Character limits applied during assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptLimits {
    pub file_chars: usize,
    pub curriculum_chars: usize,
    pub history_chars: usize,
    pub max_tokens: u32,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for PromptLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            file_chars: config.file_char_limit,
            curriculum_chars: config.curriculum_char_limit,
            history_chars: config.history_char_limit,
            max_tokens: config.max_tokens,
        }
    }
}

/// Keep the first `limit` characters; returns whether anything was cut
fn truncate_chars(text: &str, limit: usize) -> (&str, bool) {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

/// Render active files, curriculum, cycle and wishes into one block
pub async fn grounding_text(
    context: &ContextConfiguration,
    curriculum: &dyn CurriculumSource,
    limits: &PromptLimits,
) -> String {
    let mut out = String::new();

    let files: Vec<_> = context.active_files().collect();
    if !files.is_empty() {
        out.push_str("## Hochgeladene Dokumente\n\n");
        for file in files {
            let (text, cut) = truncate_chars(&file.extracted_text, limits.file_chars);
            if cut {
                debug!(name = %file.name, limit = limits.file_chars, "grounding_text: truncating file");
            }
            out.push_str(&format!("### {}\n{}", file.name, text));
            if cut {
                out.push('\n');
                out.push_str(TRUNCATION_MARKER);
            }
            out.push_str("\n\n");
        }
    }

    let curriculum_text = curriculum_excerpts(context, curriculum, limits.curriculum_chars).await;
    if !curriculum_text.is_empty() {
        out.push_str("## Lehrplan 21\n\n");
        out.push_str(&curriculum_text);
        out.push_str("\n\n");
    }

    out.push_str(&format!("## Zyklus\n{}\n", context.cycle));
    if !context.wishes.trim().is_empty() {
        out.push_str(&format!("\n## Wünsche der Lehrperson\n{}\n", context.wishes.trim()));
    }
    out
}

/// Fetch curriculum text per module, skipping unavailable modules
async fn curriculum_excerpts(context: &ContextConfiguration, curriculum: &dyn CurriculumSource, budget: usize) -> String {
    let mut out = String::new();
    let mut remaining = budget;

    for module_id in &context.selected_module_ids {
        if remaining == 0 {
            debug!(%module_id, "curriculum_excerpts: budget exhausted, skipping rest");
            break;
        }
        let text = match curriculum.fetch_module_text(module_id).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!(%module_id, "Curriculum text unavailable, skipping module");
                continue;
            }
            Err(e) => {
                warn!(%module_id, error = %e, "Failed to fetch curriculum text, skipping module");
                continue;
            }
        };

        let (kept, cut) = truncate_chars(&text, remaining);
        remaining -= kept.chars().count();
        out.push_str(&format!("### {}\n{}\n", module_id, kept));
        if cut {
            out.push_str(TRUNCATION_MARKER);
            out.push('\n');
            remaining = 0;
        }
    }
    out.trim_end().to_string()
}

pub fn system_prompt(grounding: &str) -> String {
    format!("{}\n\n# Kontext\n\n{}", SYSTEM_PREAMBLE, grounding.trim_end())
}

/// Replay earlier turns, newest first until the limit, then the new message
///
/// Locally written turns (welcome, summaries, failures) are not replayed.
/// Consecutive messages from the same side are merged.
pub fn conversation_messages(history: &[ConversationTurn], user_text: &str, history_chars: usize) -> Vec<Message> {
    let mut kept: Vec<&ConversationTurn> = Vec::new();
    let mut used = 0usize;
    for turn in history.iter().rev().filter(|t| t.is_user() || t.is_generated()) {
        let len = turn.text.chars().count();
        if used + len > history_chars {
            debug!(used, len, "conversation_messages: history limit reached");
            break;
        }
        used += len;
        kept.push(turn);
    }
    kept.reverse();

    let mut messages: Vec<Message> = Vec::with_capacity(kept.len() + 1);
    let replay = kept.into_iter().map(|t| match t.sender {
        Sender::User => Message::user(t.text.clone()),
        Sender::Assistant => Message::assistant(t.text.clone()),
    });
    for message in replay.chain(std::iter::once(Message::user(user_text))) {
        match messages.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => messages.push(message),
        }
    }

    // The model expects the conversation to open with the user
    if messages.first().is_some_and(|m| m.role == Role::Assistant) {
        messages.remove(0);
    }
    messages
}

/// Everything needed for one AI turn
pub async fn turn_request(
    context: &ContextConfiguration,
    curriculum: &dyn CurriculumSource,
    history: &[ConversationTurn],
    user_text: &str,
    limits: &PromptLimits,
) -> CompletionRequest {
    let grounding = grounding_text(context, curriculum, limits).await;
    CompletionRequest {
        system_prompt: system_prompt(&grounding),
        messages: conversation_messages(history, user_text, limits.history_chars),
        max_tokens: limits.max_tokens,
    }
}

/// Request that turns a lesson plan into the given artifact kind
pub fn artifact_request(kind: ArtifactKind, plan_text: &str, max_tokens: u32) -> CompletionRequest {
    CompletionRequest::single(
        ARTIFACT_PREAMBLE,
        format!("{}\n\n---\n\n{}", kind.instruction(), plan_text),
        max_tokens,
    )
}
