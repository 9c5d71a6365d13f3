//! Collaborator contracts consumed by the session core
//!
//! Everything the core needs from the outside world goes through these traits
//! and is injected into the session controller at construction.

use async_trait::async_trait;

use super::BackendError;
use crate::domain::{Artifact, ConversationSummary, StoredConversation, UsageState, UserIdentity};

/// Who is signed in
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserIdentity>;
}

/// Subscription tier and interaction counter of a user
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_usage(&self, user_id: &str) -> Result<UsageState, BackendError>;

    /// Count one successful AI turn
    async fn increment_usage(&self, user_id: &str) -> Result<(), BackendError>;
}

/// Turns document bytes (PDF and similar) into plain text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, bytes: &[u8], mime_type: &str) -> Result<String, BackendError>;
}

/// Curriculum text per module
#[async_trait]
pub trait CurriculumSource: Send + Sync {
    /// `Ok(None)` means the module has no text available
    async fn fetch_module_text(&self, module_id: &str) -> Result<Option<String>, BackendError>;
}

/// Persists or downloads a generated artifact
pub trait ArtifactExporter: Send + Sync {
    /// Returns where the artifact ended up
    fn export(&self, artifact: &Artifact) -> Result<String, BackendError>;
}

/// Saved conversation history
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, conversation: &StoredConversation) -> Result<(), BackendError>;

    /// Summaries for one user, most recently updated first
    async fn list(&self, user_id: &str) -> Result<Vec<ConversationSummary>, BackendError>;

    async fn load(&self, id: &str) -> Result<Option<StoredConversation>, BackendError>;

    async fn delete(&self, id: &str) -> Result<(), BackendError>;
}
