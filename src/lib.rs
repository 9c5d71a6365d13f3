//! Mibuntu - curriculum-grounded lesson planning
//!
//! A planning session pairs an educator with a generative-AI assistant. The
//! assistant sees the selected curriculum modules, the educator's own
//! uploaded documents and the conversation so far.
//!
//! # Core Concepts
//!
//! - **Draft and active context**: edits stay in a draft until applied
//! - **Usage gate**: free accounts get a fixed number of AI turns
//! - **One activity at a time**: a turn and a context apply never overlap
//! - **Artifacts**: the latest plan can be turned into a dossier, handout or presentation
//!
//! # Modules
//!
//! - [`session`] - Context store, conversation engine, usage policy and controller
//! - [`domain`] - Turns, contexts, usage and stored conversations
//! - [`backend`] - Identity, profile, extraction, curriculum, export and storage
//! - [`llm`] - Generative-AI client trait and Gemini implementation
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//! - [`repl`] - Interactive terminal shell

pub mod backend;
pub mod cli;
pub mod config;
pub mod domain;
pub mod llm;
pub mod repl;
pub mod session;

// Re-export commonly used types
pub use config::{Config, LlmConfig, SessionConfig, StorageConfig, UserConfig};
pub use domain::{
    Artifact, ArtifactKind, ContextConfiguration, ConversationSummary, ConversationTurn, Sender, StoredConversation,
    SubscriptionTier, TurnOrigin, UploadedFile, UsageState, UserIdentity,
};
pub use llm::{CompletionRequest, CompletionResponse, GeminiClient, LlmClient, LlmError};
pub use session::{
    Collaborators, ContextStore, SessionController, SessionError, SessionEvent, SessionPhase, SetupOutcome,
    TurnOutcome, UsageDecision, UsagePolicy,
};
