//! Splits an optional reasoning block off raw model output

use std::sync::LazyLock;

use regex::Regex;

pub const THINKING_START: &str = "<thinking>";
pub const THINKING_END: &str = "</thinking>";

static THINKING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "(?s){}(.*?){}",
        regex::escape(THINKING_START),
        regex::escape(THINKING_END)
    ))
    .expect("thinking pattern is a valid regex")
});

/// Rendered text and the optional reasoning that preceded it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub text: String,
    pub thought: Option<String>,
}

/// Extract the first `<thinking>…</thinking>` block
///
/// Without a complete block (no start, or no end delimiter) the whole input
/// is returned unchanged as text.
pub fn parse_reply(raw: &str) -> ParsedReply {
    match THINKING_BLOCK.captures(raw) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let thought = caps.get(1).map(|m| m.as_str().trim().to_string());
            let mut text = String::with_capacity(raw.len());
            text.push_str(&raw[..whole.start]);
            text.push_str(&raw[whole.end..]);
            ParsedReply {
                text: text.trim().to_string(),
                thought,
            }
        }
        None => ParsedReply {
            text: raw.to_string(),
            thought: None,
        },
    }
}
