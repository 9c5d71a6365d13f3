//! Session controller - the surface the UI shell talks to
//!
//! Sequences setup, draft editing, reconciliation, AI turns, artifacts and
//! conversation persistence. All collaborators are injected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use super::engine::{ConversationEngine, TurnOutcome};
use super::events::{EventBus, SessionEvent};
use super::gate::Activity;
use super::history::{HistoryBucket, group_history};
use super::policy::UsagePolicy;
use super::prompt::{self, PromptLimits};
use super::upload::{RawFile, UploadReport, extract_files};
use super::{ContextStore, SessionError};
use crate::backend::{
    ArtifactExporter, BackendError, ConversationStore, CurriculumSource, IdentityProvider, ProfileStore,
    TextExtractor,
};
use crate::config::SessionConfig;
use crate::domain::{
    Artifact, ArtifactKind, ContextConfiguration, ConversationSummary, ConversationTurn, StoredConversation,
    UploadedFile, UsageState, UserIdentity,
};
use crate::llm::{LlmClient, LlmError};

/// Seeded when setup starts without wishes
pub const WELCOME_TEXT: &str = "Willkommen bei Mibuntu! Deine Lehrplanmodule und Dokumente sind geladen. \
Beschreibe, welche Lektion oder Unterrichtseinheit du planen möchtest.";

/// Everything the controller needs from the outside world
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub profile: Arc<dyn ProfileStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub curriculum: Arc<dyn CurriculumSource>,
    pub llm: Arc<dyn LlmClient>,
    pub exporter: Arc<dyn ArtifactExporter>,
    pub conversations: Arc<dyn ConversationStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    PreSetup,
    Active,
}

/// What `start_setup` seeded the conversation with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// No wishes given; a canned welcome turn was added
    Welcomed(ConversationTurn),
    /// Wishes were sent as the opening turn
    Opened(TurnOutcome),
}

/// Counts one upload in flight until dropped
struct ProcessingFlag<'a>(&'a AtomicUsize);

impl<'a> ProcessingFlag<'a> {
    fn raise(uploads: &'a AtomicUsize) -> Self {
        uploads.fetch_add(1, Ordering::SeqCst);
        Self(uploads)
    }
}

impl Drop for ProcessingFlag<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SessionController {
    identity: Arc<dyn IdentityProvider>,
    profile: Arc<dyn ProfileStore>,
    extractor: Arc<dyn TextExtractor>,
    exporter: Arc<dyn ArtifactExporter>,
    conversations: Arc<dyn ConversationStore>,
    engine: ConversationEngine,
    context: Mutex<ContextStore>,
    phase: Mutex<SessionPhase>,
    /// Id and creation time of the stored copy of this session, once saved
    saved_as: Mutex<Option<(String, DateTime<Utc>)>>,
    /// Uploads currently extracting
    uploads_in_flight: AtomicUsize,
    /// Bumped by every reset; uploads started before it are dropped
    epoch: AtomicU64,
    apply_delay: Duration,
    events: EventBus,
}

impl SessionController {
    pub fn new(collaborators: Collaborators, config: &SessionConfig) -> Self {
        debug!(
            free_limit = config.free_limit,
            apply_delay_ms = config.apply_delay_ms,
            "SessionController::new: called"
        );
        let events = EventBus::new();
        let engine = ConversationEngine::new(
            collaborators.llm,
            collaborators.curriculum,
            collaborators.profile.clone(),
            UsagePolicy::new(config.free_limit),
            PromptLimits::from(config),
            events.clone(),
        );
        Self {
            identity: collaborators.identity,
            profile: collaborators.profile,
            extractor: collaborators.extractor,
            exporter: collaborators.exporter,
            conversations: collaborators.conversations,
            engine,
            context: Mutex::new(ContextStore::default()),
            phase: Mutex::new(SessionPhase::PreSetup),
            saved_as: Mutex::new(None),
            uploads_in_flight: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            apply_delay: config.apply_delay(),
            events,
        }
    }

    /// Subscribe to session events (turns, paywall, reconciliation, reset)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // === State accessors ===

    pub async fn phase(&self) -> SessionPhase {
        *self.phase.lock().await
    }

    pub fn activity(&self) -> Activity {
        self.engine.gate().current()
    }

    pub async fn turns(&self) -> Vec<ConversationTurn> {
        self.engine.turns().await
    }

    pub async fn active_context(&self) -> ContextConfiguration {
        self.context.lock().await.active().clone()
    }

    pub async fn draft_context(&self) -> ContextConfiguration {
        self.context.lock().await.draft().clone()
    }

    pub async fn has_unapplied_changes(&self) -> bool {
        self.context.lock().await.has_unapplied_changes()
    }

    pub fn is_processing_files(&self) -> bool {
        self.uploads_in_flight.load(Ordering::SeqCst) > 0
    }

    pub async fn usage(&self) -> UsageState {
        self.engine.usage().await
    }

    /// AI turns left before the paywall; `None` for premium
    pub async fn remaining_turns(&self) -> Option<u32> {
        self.engine.policy().remaining(&self.engine.usage().await)
    }

    fn current_user(&self) -> Result<UserIdentity, SessionError> {
        self.identity.current_user().ok_or(SessionError::NotSignedIn)
    }

    async fn require_active(&self) -> Result<(), SessionError> {
        match self.phase().await {
            SessionPhase::Active => Ok(()),
            SessionPhase::PreSetup => Err(SessionError::NotActive),
        }
    }

    /// Re-read the mirrored usage state from the profile store
    ///
    /// A failing profile store leaves the mirror as it was.
    pub async fn refresh_usage(&self) -> Result<UsageState, SessionError> {
        let user = self.current_user()?;
        match self.profile.get_usage(&user.id).await {
            Ok(usage) => {
                debug!(count = usage.interaction_count, tier = %usage.subscription_tier, "refresh_usage: loaded");
                self.engine.set_usage(usage).await;
                Ok(usage)
            }
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Failed to refresh usage, keeping local state");
                Ok(self.engine.usage().await)
            }
        }
    }

    // === Lifecycle ===

    /// Seed both contexts and open the conversation
    pub async fn start_setup<I, S>(
        &self,
        module_ids: I,
        cycle: impl Into<String>,
        wishes: impl Into<String>,
    ) -> Result<SetupOutcome, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let user = self.current_user()?;
        let config = ContextConfiguration::new(module_ids, cycle, wishes);
        self.seed(config.clone(), Vec::new(), None).await?;
        self.refresh_usage().await?;
        info!(user_id = %user.id, modules = config.module_count(), cycle = %config.cycle, "Planning session started");

        if config.wishes.trim().is_empty() {
            let turn = ConversationTurn::local(WELCOME_TEXT);
            self.engine.push(turn.clone()).await;
            return Ok(SetupOutcome::Welcomed(turn));
        }

        let outcome = self.engine.process_turn(&user.id, &self.context, &config.wishes).await?;
        Ok(SetupOutcome::Opened(outcome))
    }

    /// Seed the session from a stored conversation, without an opening turn
    pub async fn restore(&self, conversation: StoredConversation) -> Result<(), SessionError> {
        let user = self.current_user()?;
        if conversation.user_id != user.id {
            warn!(conversation_id = %conversation.id, user_id = %user.id, "Refusing to restore foreign conversation");
            return Err(SessionError::Persistence(BackendError::NotFound(format!(
                "conversation {}",
                conversation.id
            ))));
        }
        let saved_as = Some((conversation.id.clone(), conversation.created_at));
        self.seed(conversation.context, conversation.turns, saved_as).await?;
        self.refresh_usage().await?;
        info!(conversation_id = %conversation.id, "Planning session restored");
        Ok(())
    }

    /// Load a saved conversation by id and restore it
    pub async fn resume(&self, conversation_id: &str) -> Result<(), SessionError> {
        let conversation = self
            .conversations
            .load(conversation_id)
            .await
            .map_err(SessionError::Persistence)?
            .ok_or_else(|| SessionError::Persistence(BackendError::NotFound(format!("conversation {}", conversation_id))))?;
        self.restore(conversation).await
    }

    async fn seed(
        &self,
        config: ContextConfiguration,
        turns: Vec<ConversationTurn>,
        saved_as: Option<(String, DateTime<Utc>)>,
    ) -> Result<(), SessionError> {
        let mut phase = self.phase.lock().await;
        if *phase == SessionPhase::Active {
            return Err(SessionError::AlreadyActive);
        }
        *self.context.lock().await = ContextStore::seeded(config);
        self.engine.replace(turns).await;
        *self.saved_as.lock().await = saved_as;
        *phase = SessionPhase::Active;
        Ok(())
    }

    /// Clear all session state and return to pre-setup
    ///
    /// Refused while a turn or a reconciliation is in flight.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let _guard = self.engine.gate().try_enter(Activity::Reconciling).map_err(SessionError::Busy)?;
        let mut phase = self.phase.lock().await;
        self.engine.clear().await;
        {
            let mut context = self.context.lock().await;
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *context = ContextStore::default();
        }
        *self.saved_as.lock().await = None;
        *phase = SessionPhase::PreSetup;
        info!("Planning session reset");
        self.events.emit(SessionEvent::Reset);
        Ok(())
    }

    // === Draft editing ===

    pub async fn toggle_module(&self, module_id: &str) -> Result<(), SessionError> {
        self.require_active().await?;
        self.context.lock().await.toggle_module(module_id);
        Ok(())
    }

    /// Extract and append files to the draft; failing files are skipped
    ///
    /// A reset while extracting discards the files and reports `NotActive`.
    pub async fn upload_files(&self, files: Vec<RawFile>) -> Result<UploadReport, SessionError> {
        self.require_active().await?;
        let epoch = self.epoch.load(Ordering::SeqCst);
        let _processing = ProcessingFlag::raise(&self.uploads_in_flight);

        let (uploaded, report) = extract_files(self.extractor.as_ref(), files).await;
        {
            let mut context = self.context.lock().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                warn!(dropped = uploaded.len(), "Session was reset during upload, discarding files");
                return Err(SessionError::NotActive);
            }
            context.add_files(uploaded);
        }
        info!(added = report.added.len(), skipped = report.skipped.len(), "Files uploaded to draft");
        Ok(report)
    }

    pub async fn remove_file(&self, index: usize) -> Result<Option<UploadedFile>, SessionError> {
        self.require_active().await?;
        Ok(self.context.lock().await.remove_file(index))
    }

    pub async fn toggle_file_active(&self, index: usize) -> Result<Option<bool>, SessionError> {
        self.require_active().await?;
        Ok(self.context.lock().await.toggle_file_active(index))
    }

    /// Reconcile the draft into the active context
    ///
    /// Holds the session gate as `Reconciling` for the configured delay,
    /// then swaps and appends a local summary turn.
    pub async fn apply_changes(&self) -> Result<ConversationTurn, SessionError> {
        self.require_active().await?;
        let _guard = self.engine.gate().try_enter(Activity::Reconciling).map_err(SessionError::Busy)?;

        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }

        let (module_count, active_file_count) = {
            let mut context = self.context.lock().await;
            let active = context.apply();
            (active.module_count(), active.active_file_count())
        };
        info!(module_count, active_file_count, "Context changes applied");

        let turn = ConversationTurn::local(format!(
            "Kontext aktualisiert: {} Lehrplanmodul(e) und {} aktive Datei(en) werden ab jetzt berücksichtigt.",
            module_count, active_file_count
        ));
        self.engine.push(turn.clone()).await;
        self.events.emit(SessionEvent::ChangesApplied {
            module_count,
            active_file_count,
        });
        Ok(turn)
    }

    // === Conversation ===

    /// Send one message through the conversation engine
    pub async fn send_message(&self, text: &str) -> Result<TurnOutcome, SessionError> {
        self.require_active().await?;
        let user = self.current_user()?;
        self.engine.process_turn(&user.id, &self.context, text).await
    }

    // === Artifacts ===

    /// Turn the latest generated lesson plan into a document
    ///
    /// Leaves the session untouched on failure.
    pub async fn generate_artifact(&self, kind: ArtifactKind) -> Result<Artifact, SessionError> {
        let plan = self.engine.latest_generated().await.ok_or(SessionError::NoAssistantTurn)?;
        let request = prompt::artifact_request(kind, &plan.text, self.engine.limits().max_tokens);
        debug!(%kind, plan_turn = %plan.id, "generate_artifact: calling model");

        let response = self.engine.llm().complete(request).await.map_err(SessionError::Artifact)?;
        let content = response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SessionError::Artifact(LlmError::InvalidResponse("empty artifact".to_string())))?;

        Ok(Artifact::new(kind, content.trim()))
    }

    /// Generate an artifact and hand it to the export collaborator
    pub async fn export_artifact(&self, kind: ArtifactKind) -> Result<(Artifact, String), SessionError> {
        let artifact = self.generate_artifact(kind).await?;
        let location = self.exporter.export(&artifact).map_err(SessionError::Export)?;
        info!(%kind, %location, "Artifact exported");
        Ok((artifact, location))
    }

    // === History ===

    /// Save the active context and turns; later saves overwrite the same entry
    pub async fn save_conversation(&self) -> Result<ConversationSummary, SessionError> {
        self.require_active().await?;
        let user = self.current_user()?;

        let context = self.active_context().await;
        let turns = self.turns().await;
        let mut conversation = StoredConversation::new(&user.id, context, turns);

        let mut saved_as = self.saved_as.lock().await;
        if let Some((id, created_at)) = saved_as.as_ref() {
            conversation.id = id.clone();
            conversation.created_at = *created_at;
        }
        self.conversations
            .save(&conversation)
            .await
            .map_err(SessionError::Persistence)?;
        *saved_as = Some((conversation.id.clone(), conversation.created_at));

        info!(conversation_id = %conversation.id, turns = conversation.turns.len(), "Conversation saved");
        Ok(conversation.summary())
    }

    /// Saved conversations of the signed-in user, grouped by age
    pub async fn list_history(&self) -> Result<Vec<(HistoryBucket, Vec<ConversationSummary>)>, SessionError> {
        let user = self.current_user()?;
        let summaries = self
            .conversations
            .list(&user.id)
            .await
            .map_err(SessionError::Persistence)?;
        Ok(group_history(summaries, Utc::now()))
    }

    /// Delete one of the signed-in user's saved conversations
    ///
    /// Another user's conversation is reported as not found.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), SessionError> {
        let user = self.current_user()?;
        let owned = self
            .conversations
            .load(conversation_id)
            .await
            .map_err(SessionError::Persistence)?
            .is_some_and(|c| c.user_id == user.id);
        if !owned {
            warn!(%conversation_id, user_id = %user.id, "Refusing to delete missing or foreign conversation");
            return Err(SessionError::Persistence(BackendError::NotFound(format!(
                "conversation {}",
                conversation_id
            ))));
        }
        self.conversations
            .delete(conversation_id)
            .await
            .map_err(SessionError::Persistence)?;

        let mut saved_as = self.saved_as.lock().await;
        if saved_as.as_ref().is_some_and(|(id, _)| id == conversation_id) {
            *saved_as = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        EchoExtractor, InMemoryConversationStore, InMemoryProfileStore, MemoryExporter, StaticCurriculum,
        StaticIdentity,
    };
    use crate::domain::SubscriptionTier;
    use crate::llm::client::mock::{MockLlmClient, MockReply};
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use crate::session::engine::{GENERATION_FAILED_TEXT, NOT_CONFIGURED_TEXT};

    struct Harness {
        controller: Arc<SessionController>,
        llm: Arc<MockLlmClient>,
        profile: Arc<InMemoryProfileStore>,
        exporter: Arc<MemoryExporter>,
    }

    fn planner() -> UserIdentity {
        UserIdentity::new("u1", "Frau Muster", "muster@example.ch")
    }

    fn no_delay() -> SessionConfig {
        SessionConfig {
            apply_delay_ms: 0,
            ..SessionConfig::default()
        }
    }

    fn harness_with(llm: MockLlmClient, usage: UsageState, identity: StaticIdentity) -> Harness {
        let llm = Arc::new(llm);
        let profile = Arc::new(InMemoryProfileStore::with_usage("u1", usage));
        let exporter = Arc::new(MemoryExporter::new());
        let collaborators = Collaborators {
            identity: Arc::new(identity),
            profile: profile.clone(),
            extractor: Arc::new(EchoExtractor),
            curriculum: Arc::new(StaticCurriculum::new().with_module("MOD_MATH", "Zahl und Variable")),
            llm: llm.clone(),
            exporter: exporter.clone(),
            conversations: Arc::new(InMemoryConversationStore::new()),
        };
        Harness {
            controller: Arc::new(SessionController::new(collaborators, &no_delay())),
            llm,
            profile,
            exporter,
        }
    }

    /// Controller over a shared conversation store and a chosen extractor
    fn controller_for(
        user: UserIdentity,
        conversations: Arc<InMemoryConversationStore>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Arc<SessionController> {
        let collaborators = Collaborators {
            identity: Arc::new(StaticIdentity::signed_in(user)),
            profile: Arc::new(InMemoryProfileStore::new()),
            extractor,
            curriculum: Arc::new(StaticCurriculum::new()),
            llm: Arc::new(MockLlmClient::with_texts(&["Plan"])),
            exporter: Arc::new(MemoryExporter::new()),
            conversations,
        };
        Arc::new(SessionController::new(collaborators, &no_delay()))
    }

    /// Extractor whose calls wait until released one at a time
    #[derive(Default)]
    struct GatedExtractor {
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextExtractor for GatedExtractor {
        async fn extract_text(&self, bytes: &[u8], _mime_type: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    fn pdf(name: &str) -> Vec<RawFile> {
        vec![RawFile::new(name, "application/pdf", name.as_bytes().to_vec())]
    }

    fn harness(replies: Vec<MockReply>, usage: UsageState) -> Harness {
        harness_with(MockLlmClient::new(replies), usage, StaticIdentity::signed_in(planner()))
    }

    fn text(s: &str) -> MockReply {
        MockReply::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_welcome_then_allowed_then_blocked() {
        let h = harness(vec![text("## Lektion Brüche")], UsageState::new(SubscriptionTier::Free, 4));
        let mut events = h.controller.subscribe();

        let outcome = h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();
        assert!(matches!(outcome, SetupOutcome::Welcomed(_)));
        assert_eq!(h.controller.turns().await.len(), 1);
        assert_eq!(h.controller.usage().await.interaction_count, 4);

        let outcome = h.controller.send_message("Erstelle eine Lektion").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed(_)));
        assert_eq!(h.controller.turns().await.len(), 3);
        assert_eq!(h.controller.usage().await.interaction_count, 5);
        assert_eq!(h.profile.usage_of("u1").await.interaction_count, 5);

        let outcome = h.controller.send_message("Noch eine Lektion").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Blocked { count: 5, limit: 5 });
        assert_eq!(h.controller.turns().await.len(), 3);
        assert_eq!(h.llm.call_count(), 1);

        let mut saw_paywall = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::PaywallReached { count: 5, limit: 5 }) {
                saw_paywall = true;
            }
        }
        assert!(saw_paywall);
    }

    #[tokio::test]
    async fn test_wishes_trigger_opening_turn() {
        let h = harness(vec![text("Vorschlag")], UsageState::default());

        let outcome = h.controller.start_setup(["MOD_MATH"], "cycle1", "Thema Wasser").await.unwrap();

        assert!(matches!(outcome, SetupOutcome::Opened(TurnOutcome::Completed(_))));
        let turns = h.controller.turns().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "Thema Wasser");
        assert_eq!(turns[1].text, "Vorschlag");
        assert!(h.llm.requests()[0].system_prompt.contains("Thema Wasser"));
    }

    #[tokio::test]
    async fn test_premium_is_never_blocked() {
        let h = harness(vec![text("a"), text("b")], UsageState::new(SubscriptionTier::Premium, 500));
        h.controller.start_setup(["MOD_MATH"], "cycle3", "").await.unwrap();

        assert!(matches!(h.controller.send_message("x").await.unwrap(), TurnOutcome::Completed(_)));
        assert!(matches!(h.controller.send_message("y").await.unwrap(), TurnOutcome::Completed(_)));
        assert_eq!(h.controller.remaining_turns().await, None);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_user_turn_and_count() {
        let h = harness(vec![MockReply::ApiError(500)], UsageState::new(SubscriptionTier::Free, 2));
        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();

        let outcome = h.controller.send_message("Hallo").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Failed { retryable: true, .. }));
        let turns = h.controller.turns().await;
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].text, "Hallo");
        assert_eq!(turns[2].text, GENERATION_FAILED_TEXT);
        assert_eq!(h.controller.usage().await.interaction_count, 2);
        assert_eq!(h.controller.activity(), Activity::Idle);
    }

    #[tokio::test]
    async fn test_missing_key_keeps_session_usable() {
        let h = harness(vec![MockReply::MissingKey], UsageState::default());
        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();

        h.controller.send_message("Hallo").await.unwrap();
        assert_eq!(h.controller.turns().await.last().unwrap().text, NOT_CONFIGURED_TEXT);

        h.controller.toggle_module("MOD_NMG").await.unwrap();
        h.controller.apply_changes().await.unwrap();
        assert!(h.controller.active_context().await.selected_module_ids.contains("MOD_NMG"));
    }

    #[tokio::test]
    async fn test_upload_with_one_failing_file() {
        let h = harness(vec![], UsageState::default());
        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();

        let report = h
            .controller
            .upload_files(vec![
                RawFile::new("gut.pdf", "application/pdf", b"Arbeitsblatt".to_vec()),
                RawFile::new("kaputt.pdf", "application/pdf", b"FAIL".to_vec()),
            ])
            .await
            .unwrap();

        assert_eq!(report.added, vec!["gut.pdf".to_string()]);
        assert_eq!(report.skipped.len(), 1);
        let draft = h.controller.draft_context().await;
        assert_eq!(draft.uploaded_files, vec![UploadedFile::new("gut.pdf", "Arbeitsblatt")]);
        assert!(h.controller.active_context().await.uploaded_files.is_empty());
        assert!(h.controller.has_unapplied_changes().await);
        assert!(!h.controller.is_processing_files());
    }

    #[tokio::test]
    async fn test_apply_changes_summarises_and_clears_dirty_flag() {
        let h = harness(vec![], UsageState::default());
        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();
        h.controller
            .upload_files(vec![
                RawFile::new("a.txt", "text/plain", b"A".to_vec()),
                RawFile::new("b.txt", "text/plain", b"B".to_vec()),
            ])
            .await
            .unwrap();
        h.controller.toggle_file_active(1).await.unwrap();
        h.controller.toggle_module("MOD_NMG").await.unwrap();

        let turn = h.controller.apply_changes().await.unwrap();

        assert!(turn.text.contains("2 Lehrplanmodul(e)"));
        assert!(turn.text.contains("1 aktive Datei(en)"));
        assert!(!turn.is_generated());
        assert!(!h.controller.has_unapplied_changes().await);
        assert_eq!(h.controller.active_context().await.uploaded_files.len(), 2);
        assert_eq!(h.llm.call_count(), 0);

        h.controller.remove_file(0).await.unwrap();
        assert!(h.controller.has_unapplied_changes().await);
    }

    #[tokio::test]
    async fn test_concurrent_send_and_apply_are_refused() {
        let (llm, release) = MockLlmClient::gated(vec![text("fertig")]);
        let h = harness_with(llm, UsageState::default(), StaticIdentity::signed_in(planner()));
        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();

        let controller = h.controller.clone();
        let first = tokio::spawn(async move { controller.send_message("erste").await });

        while h.llm.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.controller.activity(), Activity::Generating);

        let second = h.controller.send_message("zweite").await;
        assert!(matches!(second, Err(SessionError::Busy(Activity::Generating))));
        let apply = h.controller.apply_changes().await;
        assert!(matches!(apply, Err(SessionError::Busy(Activity::Generating))));

        // Draft edits stay available during a turn
        h.controller.toggle_module("MOD_NMG").await.unwrap();

        release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed(_)));
        assert_eq!(h.llm.call_count(), 1);
        assert_eq!(h.controller.turns().await.len(), 3);
        assert!(!h.controller.active_context().await.selected_module_ids.contains("MOD_NMG"));
    }

    #[tokio::test]
    async fn test_operations_need_active_session_and_user() {
        let h = harness(vec![], UsageState::default());
        assert!(matches!(h.controller.send_message("x").await, Err(SessionError::NotActive)));
        assert!(matches!(h.controller.apply_changes().await, Err(SessionError::NotActive)));

        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();
        assert!(matches!(
            h.controller.start_setup(["MOD_MATH"], "cycle2", "").await,
            Err(SessionError::AlreadyActive)
        ));

        let anon = harness_with(MockLlmClient::new(vec![]), UsageState::default(), StaticIdentity::signed_out());
        assert!(matches!(
            anon.controller.start_setup(["MOD_MATH"], "cycle2", "").await,
            Err(SessionError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_reset_returns_to_pre_setup() {
        let h = harness(vec![text("x")], UsageState::default());
        h.controller.start_setup(["MOD_MATH"], "cycle2", "Brüche").await.unwrap();
        let mut events = h.controller.subscribe();

        h.controller.reset().await.unwrap();

        assert_eq!(h.controller.phase().await, SessionPhase::PreSetup);
        assert!(h.controller.turns().await.is_empty());
        assert_eq!(h.controller.active_context().await, ContextConfiguration::default());
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Reset)));
        assert_eq!(h.controller.usage().await.interaction_count, 1);

        h.controller.start_setup(["MOD_NMG"], "cycle1", "").await.unwrap();
        assert_eq!(h.controller.turns().await.len(), 1);
    }

    #[tokio::test]
    async fn test_artifact_needs_generated_turn() {
        let h = harness(vec![MockReply::ApiError(500)], UsageState::default());
        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();
        h.controller.send_message("Hallo").await.unwrap();

        // Welcome and failure turns are not lesson plans
        let err = h.controller.generate_artifact(ArtifactKind::Dossier).await.unwrap_err();
        assert!(matches!(err, SessionError::NoAssistantTurn));
    }

    #[tokio::test]
    async fn test_export_artifact_uses_latest_plan() {
        let h = harness(
            vec![text("Plan A"), text("<thinking>x</thinking>Plan B"), text("# Dossier\nInhalt")],
            UsageState::new(SubscriptionTier::Premium, 0),
        );
        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();
        h.controller.send_message("eins").await.unwrap();
        h.controller.send_message("zwei").await.unwrap();
        let turns_before = h.controller.turns().await.len();
        let count_before = h.controller.usage().await.interaction_count;

        let (artifact, location) = h.controller.export_artifact(ArtifactKind::Dossier).await.unwrap();

        assert_eq!(artifact.content, "# Dossier\nInhalt");
        assert!(location.starts_with("memory://dossier-"));
        assert_eq!(h.exporter.exported(), vec![artifact]);
        let request = &h.llm.requests()[2];
        assert!(request.messages[0].content.ends_with("Plan B"));
        assert_eq!(h.controller.turns().await.len(), turns_before);
        assert_eq!(h.controller.usage().await.interaction_count, count_before);
    }

    #[tokio::test]
    async fn test_artifact_failure_is_reported() {
        let h = harness(vec![text("Plan"), MockReply::ApiError(500)], UsageState::default());
        h.controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();
        h.controller.send_message("eins").await.unwrap();

        let err = h.controller.generate_artifact(ArtifactKind::Handout).await.unwrap_err();

        assert!(matches!(err, SessionError::Artifact(LlmError::ApiError { status: 500, .. })));
        assert!(h.exporter.exported().is_empty());
        assert_eq!(h.controller.turns().await.len(), 3);
    }

    #[tokio::test]
    async fn test_save_restore_roundtrip() {
        let h = harness(vec![text("Plan")], UsageState::default());
        h.controller.start_setup(["MOD_MATH"], "cycle2", "Brüche").await.unwrap();

        let first = h.controller.save_conversation().await.unwrap();
        assert_eq!(first.title, "Brüche");
        assert_eq!(first.turn_count, 2);

        // Saving again updates the same entry
        let again = h.controller.save_conversation().await.unwrap();
        assert_eq!(again.id, first.id);

        let history = h.controller.list_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].0, HistoryBucket::Today);
        assert_eq!(history[0].1.len(), 1);

        h.controller.reset().await.unwrap();
        h.controller.resume(&first.id).await.unwrap();

        assert_eq!(h.controller.phase().await, SessionPhase::Active);
        let turns = h.controller.turns().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text, "Plan");
        assert!(h.controller.active_context().await.selected_module_ids.contains("MOD_MATH"));
        assert!(!h.controller.has_unapplied_changes().await);

        h.controller.delete_conversation(&first.id).await.unwrap();
        assert!(h.controller.list_history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_unknown_conversation_fails() {
        let h = harness(vec![], UsageState::default());
        let err = h.controller.resume("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));
        assert_eq!(h.controller.phase().await, SessionPhase::PreSetup);
    }

    #[tokio::test]
    async fn test_foreign_conversation_cannot_be_resumed_or_deleted() {
        let store = Arc::new(InMemoryConversationStore::new());
        let owner = controller_for(planner(), store.clone(), Arc::new(EchoExtractor));
        owner.start_setup(["MOD_MATH"], "cycle2", "Brüche").await.unwrap();
        let saved = owner.save_conversation().await.unwrap();

        let other = UserIdentity::new("u2", "Herr Beispiel", "beispiel@example.ch");
        let intruder = controller_for(other, store.clone(), Arc::new(EchoExtractor));

        let err = intruder.resume(&saved.id).await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(BackendError::NotFound(_))));
        assert_eq!(intruder.phase().await, SessionPhase::PreSetup);

        let err = intruder.delete_conversation(&saved.id).await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(BackendError::NotFound(_))));
        assert!(intruder.list_history().await.unwrap().is_empty());

        let history = owner.list_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].1[0].id, saved.id);
    }

    #[tokio::test]
    async fn test_delete_unknown_conversation_fails() {
        let h = harness(vec![], UsageState::default());
        let err = h.controller.delete_conversation("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_processing_flag_covers_overlapping_uploads() {
        let extractor = Arc::new(GatedExtractor::default());
        let controller = controller_for(planner(), Arc::new(InMemoryConversationStore::new()), extractor.clone());
        controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();
        assert!(!controller.is_processing_files());

        let c1 = controller.clone();
        let first = tokio::spawn(async move { c1.upload_files(pdf("eins.pdf")).await });
        let c2 = controller.clone();
        let second = tokio::spawn(async move { c2.upload_files(pdf("zwei.pdf")).await });

        while extractor.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert!(controller.is_processing_files());

        extractor.release.notify_one();
        while controller.draft_context().await.uploaded_files.is_empty() {
            tokio::task::yield_now().await;
        }
        // One upload finished, the other is still extracting
        assert!(controller.is_processing_files());

        extractor.release.notify_one();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert!(!controller.is_processing_files());
        assert_eq!(controller.draft_context().await.uploaded_files.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_during_upload_discards_files() {
        let extractor = Arc::new(GatedExtractor::default());
        let controller = controller_for(planner(), Arc::new(InMemoryConversationStore::new()), extractor.clone());
        controller.start_setup(["MOD_MATH"], "cycle2", "").await.unwrap();

        let c1 = controller.clone();
        let upload = tokio::spawn(async move { c1.upload_files(pdf("spaet.pdf")).await });
        while extractor.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        controller.reset().await.unwrap();
        extractor.release.notify_one();

        let result = upload.await.unwrap();
        assert!(matches!(result, Err(SessionError::NotActive)));
        assert!(!controller.is_processing_files());
        assert!(!controller.has_unapplied_changes().await);
        assert!(controller.draft_context().await.uploaded_files.is_empty());
    }
}
