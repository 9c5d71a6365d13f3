//! In-memory collaborators
//!
//! Used by embedders that keep everything in process, and by tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    ArtifactExporter, BackendError, ConversationStore, CurriculumSource, IdentityProvider, ProfileStore,
    TextExtractor,
};
use crate::domain::{Artifact, ConversationSummary, StoredConversation, UsageState, UserIdentity};

/// Fixed identity, or nobody signed in
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<UserIdentity>);

impl StaticIdentity {
    pub fn signed_in(user: UserIdentity) -> Self {
        Self(Some(user))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<UserIdentity> {
        self.0.clone()
    }
}

/// Profile store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    usage: Mutex<HashMap<String, UsageState>>,
    fail_increments: bool,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user's usage
    pub fn with_usage(user_id: impl Into<String>, usage: UsageState) -> Self {
        let mut map = HashMap::new();
        map.insert(user_id.into(), usage);
        Self {
            usage: Mutex::new(map),
            fail_increments: false,
        }
    }

    /// Every increment fails with `Unavailable`
    pub fn failing_increments(mut self) -> Self {
        self.fail_increments = true;
        self
    }

    pub async fn usage_of(&self, user_id: &str) -> UsageState {
        self.usage.lock().await.get(user_id).copied().unwrap_or_default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_usage(&self, user_id: &str) -> Result<UsageState, BackendError> {
        Ok(self.usage_of(user_id).await)
    }

    async fn increment_usage(&self, user_id: &str) -> Result<(), BackendError> {
        if self.fail_increments {
            return Err(BackendError::Unavailable("profile store rejected the update".to_string()));
        }
        let mut usage = self.usage.lock().await;
        usage.entry(user_id.to_string()).or_default().record_interaction();
        Ok(())
    }
}

/// Curriculum texts held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticCurriculum {
    modules: HashMap<String, String>,
    broken: HashSet<String>,
}

impl StaticCurriculum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.modules.insert(module_id.into(), text.into());
        self
    }

    /// Fetching this module fails instead of returning text
    pub fn with_broken_module(mut self, module_id: impl Into<String>) -> Self {
        self.broken.insert(module_id.into());
        self
    }
}

#[async_trait]
impl CurriculumSource for StaticCurriculum {
    async fn fetch_module_text(&self, module_id: &str) -> Result<Option<String>, BackendError> {
        if self.broken.contains(module_id) {
            return Err(BackendError::Unavailable(format!("module {} could not be fetched", module_id)));
        }
        Ok(self.modules.get(module_id).cloned())
    }
}

/// Extractor that decodes document bytes as UTF-8
///
/// Bytes that start with `FAIL` produce an extraction error.
#[derive(Debug, Clone, Default)]
pub struct EchoExtractor;

#[async_trait]
impl TextExtractor for EchoExtractor {
    async fn extract_text(&self, bytes: &[u8], mime_type: &str) -> Result<String, BackendError> {
        debug!(%mime_type, len = bytes.len(), "EchoExtractor::extract_text: called");
        if bytes.starts_with(b"FAIL") {
            return Err(BackendError::Extraction("document is damaged".to_string()));
        }
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Keeps exported artifacts in memory
#[derive(Debug, Default)]
pub struct MemoryExporter {
    exported: StdMutex<Vec<Artifact>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported(&self) -> Vec<Artifact> {
        self.exported.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl ArtifactExporter for MemoryExporter {
    fn export(&self, artifact: &Artifact) -> Result<String, BackendError> {
        let mut exported = self
            .exported
            .lock()
            .map_err(|_| BackendError::Unavailable("exporter lock poisoned".to_string()))?;
        exported.push(artifact.clone());
        Ok(format!("memory://{}", artifact.filename))
    }
}

/// Conversation history held in memory
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, StoredConversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save(&self, conversation: &StoredConversation) -> Result<(), BackendError> {
        self.conversations
            .lock()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ConversationSummary>, BackendError> {
        let conversations = self.conversations.lock().await;
        let mut summaries: Vec<ConversationSummary> = conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .map(StoredConversation::summary)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn load(&self, id: &str) -> Result<Option<StoredConversation>, BackendError> {
        Ok(self.conversations.lock().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.conversations
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("conversation {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactKind, ContextConfiguration, ConversationTurn, SubscriptionTier};

    #[tokio::test]
    async fn test_profile_increment() {
        let store = InMemoryProfileStore::with_usage("u1", UsageState::new(SubscriptionTier::Free, 4));
        store.increment_usage("u1").await.unwrap();
        assert_eq!(store.get_usage("u1").await.unwrap().interaction_count, 5);

        // Unknown users start at zero
        store.increment_usage("u2").await.unwrap();
        assert_eq!(store.usage_of("u2").await.interaction_count, 1);
    }

    #[tokio::test]
    async fn test_profile_failing_increments() {
        let store = InMemoryProfileStore::new().failing_increments();
        assert!(store.increment_usage("u1").await.is_err());
        assert_eq!(store.usage_of("u1").await.interaction_count, 0);
    }

    #[tokio::test]
    async fn test_curriculum_outcomes() {
        let curriculum = StaticCurriculum::new()
            .with_module("MA.1", "Zahlen")
            .with_broken_module("MA.2");

        assert_eq!(curriculum.fetch_module_text("MA.1").await.unwrap().as_deref(), Some("Zahlen"));
        assert!(curriculum.fetch_module_text("MA.2").await.is_err());
        assert!(curriculum.fetch_module_text("MA.3").await.unwrap().is_none());
    }

    #[test]
    fn test_memory_exporter_records() {
        let exporter = MemoryExporter::new();
        let artifact = Artifact::new(ArtifactKind::Dossier, "# Dossier");
        let location = exporter.export(&artifact).unwrap();
        assert!(location.starts_with("memory://dossier-"));
        assert_eq!(exporter.exported(), vec![artifact]);
    }

    #[tokio::test]
    async fn test_conversation_store_roundtrip() {
        let store = InMemoryConversationStore::new();
        let conv = StoredConversation::new("u1", ContextConfiguration::default(), vec![ConversationTurn::user("a")]);
        store.save(&conv).await.unwrap();

        assert_eq!(store.list("u1").await.unwrap().len(), 1);
        assert!(store.list("u2").await.unwrap().is_empty());
        assert_eq!(store.load(&conv.id).await.unwrap(), Some(conv.clone()));

        store.delete(&conv.id).await.unwrap();
        assert!(matches!(store.delete(&conv.id).await, Err(BackendError::NotFound(_))));
    }
}
