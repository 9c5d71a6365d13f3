//! Lesson-planning session core
//!
//! - `ContextStore`: draft and active context, unapplied-changes flag
//! - `ConversationEngine`: turn sequence and the AI-turn protocol
//! - `UsagePolicy`: free-tier gate
//! - `SessionController`: lifecycle surface for the UI shell

mod context_store;
mod controller;
mod engine;
mod error;
mod events;
mod gate;
mod history;
mod policy;
pub mod prompt;
mod thinking;
mod upload;

pub use context_store::ContextStore;
pub use controller::{Collaborators, SessionController, SessionPhase, SetupOutcome, WELCOME_TEXT};
pub use engine::{ConversationEngine, GENERATION_FAILED_TEXT, NOT_CONFIGURED_TEXT, TurnOutcome};
pub use error::SessionError;
pub use events::SessionEvent;
pub use gate::{Activity, ActivityGate, GateGuard};
pub use history::{HistoryBucket, group_history};
pub use policy::{FREE_LIMIT, UsageDecision, UsagePolicy, decide};
pub use thinking::{ParsedReply, THINKING_END, THINKING_START, parse_reply};
pub use upload::{RawFile, SkippedFile, UploadReport, extract_files};
