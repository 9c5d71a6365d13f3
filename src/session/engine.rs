//! Conversation engine - owns the turn sequence and drives AI turns
//!
//! One turn runs `gate -> usage check -> user turn -> prompt -> model ->
//! count -> parse -> assistant turn`. A blocked turn records nothing. A
//! failed model call records a failure turn and counts nothing.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::events::{EventBus, SessionEvent};
use super::gate::{Activity, ActivityGate};
use super::policy::{UsageDecision, UsagePolicy};
use super::prompt::{self, PromptLimits};
use super::thinking::parse_reply;
use super::{ContextStore, SessionError};
use crate::backend::{CurriculumSource, ProfileStore};
use crate::domain::{ConversationTurn, UsageState};
use crate::llm::{LlmClient, LlmError, StopReason};

/// Shown when the model call fails
pub const GENERATION_FAILED_TEXT: &str = "Entschuldigung, beim Erstellen der Antwort ist ein Fehler aufgetreten. \
Bitte versuche es noch einmal.";

/// Shown when the provider throttles requests
fn rate_limited_text(wait_secs: u64) -> String {
    format!(
        "Es wurden gerade zu viele Anfragen gestellt. Bitte warte etwa {} Sekunden und versuche es dann noch einmal.",
        wait_secs.max(1)
    )
}

/// Shown when no API key is configured
pub const NOT_CONFIGURED_TEXT: &str = "Die KI ist nicht konfiguriert: Es wurde kein API-Schlüssel gefunden. \
Du kannst den Kontext weiter bearbeiten, aber es können keine Antworten erstellt werden.";

/// How a call to `process_turn` ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Input was blank; nothing happened
    Ignored,

    /// The usage gate refused the turn; nothing was recorded
    Blocked { count: u32, limit: u32 },

    /// The model answered; carries the assistant turn
    Completed(ConversationTurn),

    /// The model call failed; carries the failure turn and whether the
    /// same message may succeed if sent again later
    Failed { turn: ConversationTurn, retryable: bool },
}

impl TurnOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, TurnOutcome::Blocked { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TurnOutcome::Failed { retryable: true, .. })
    }
}

pub struct ConversationEngine {
    llm: Arc<dyn LlmClient>,
    curriculum: Arc<dyn CurriculumSource>,
    profile: Arc<dyn ProfileStore>,
    policy: UsagePolicy,
    limits: PromptLimits,
    turns: Mutex<Vec<ConversationTurn>>,
    usage: Mutex<UsageState>,
    gate: ActivityGate,
    events: EventBus,
}

impl ConversationEngine {
    pub(crate) fn new(
        llm: Arc<dyn LlmClient>,
        curriculum: Arc<dyn CurriculumSource>,
        profile: Arc<dyn ProfileStore>,
        policy: UsagePolicy,
        limits: PromptLimits,
        events: EventBus,
    ) -> Self {
        Self {
            llm,
            curriculum,
            profile,
            policy,
            limits,
            turns: Mutex::new(Vec::new()),
            usage: Mutex::new(UsageState::default()),
            gate: ActivityGate::new(),
            events,
        }
    }

    pub(crate) fn gate(&self) -> &ActivityGate {
        &self.gate
    }

    pub(crate) fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn policy(&self) -> UsagePolicy {
        self.policy
    }

    pub fn limits(&self) -> PromptLimits {
        self.limits
    }

    pub async fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.lock().await.clone()
    }

    pub async fn usage(&self) -> UsageState {
        *self.usage.lock().await
    }

    pub(crate) async fn set_usage(&self, usage: UsageState) {
        *self.usage.lock().await = usage;
    }

    /// Latest assistant turn whose text came from the model
    pub async fn latest_generated(&self) -> Option<ConversationTurn> {
        self.turns.lock().await.iter().rev().find(|t| t.is_generated()).cloned()
    }

    pub(crate) async fn push(&self, turn: ConversationTurn) {
        self.turns.lock().await.push(turn.clone());
        self.events.emit(SessionEvent::TurnAppended { turn });
    }

    /// Replace the whole sequence (restore)
    pub(crate) async fn replace(&self, turns: Vec<ConversationTurn>) {
        *self.turns.lock().await = turns;
    }

    pub(crate) async fn clear(&self) {
        self.turns.lock().await.clear();
    }

    /// Run one AI turn against the active context of `context`
    ///
    /// Refuses with `Busy` while another turn or a reconciliation holds the
    /// session gate.
    pub async fn process_turn(
        &self,
        user_id: &str,
        context: &Mutex<ContextStore>,
        user_text: &str,
    ) -> Result<TurnOutcome, SessionError> {
        let text = user_text.trim();
        if text.is_empty() {
            debug!("process_turn: empty input, ignoring");
            return Ok(TurnOutcome::Ignored);
        }

        let _guard = self.gate.try_enter(Activity::Generating).map_err(SessionError::Busy)?;

        let usage = self.usage().await;
        if self.policy.decide_for(&usage) == UsageDecision::Block {
            info!(count = usage.interaction_count, limit = self.policy.free_limit(), "Usage limit reached");
            self.events.emit(SessionEvent::PaywallReached {
                count: usage.interaction_count,
                limit: self.policy.free_limit(),
            });
            return Ok(TurnOutcome::Blocked {
                count: usage.interaction_count,
                limit: self.policy.free_limit(),
            });
        }

        let history = self.turns().await;
        self.push(ConversationTurn::user(text)).await;

        let active = context.lock().await.active().clone();
        let request = prompt::turn_request(&active, self.curriculum.as_ref(), &history, text, &self.limits).await;
        debug!(
            messages = request.messages.len(),
            system_chars = request.system_prompt.len(),
            "process_turn: calling model"
        );

        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) => return Ok(self.fail(e).await),
        };
        debug!(
            stop_reason = ?response.stop_reason,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "process_turn: model answered"
        );
        match response.stop_reason {
            StopReason::Safety => {
                let error = LlmError::InvalidResponse("answer withheld by safety filter".to_string());
                return Ok(self.fail(error).await);
            }
            StopReason::MaxTokens => warn!(max_tokens = self.limits.max_tokens, "Answer cut off at token limit"),
            StopReason::EndTurn | StopReason::Other(_) => {}
        }
        let Some(raw) = response.content.filter(|c| !c.trim().is_empty()) else {
            return Ok(self.fail(LlmError::InvalidResponse("empty response".to_string())).await);
        };

        self.count_interaction(user_id).await;

        let parsed = parse_reply(&raw);
        let turn = ConversationTurn::assistant(parsed.text, parsed.thought);
        self.push(turn.clone()).await;
        Ok(TurnOutcome::Completed(turn))
    }

    async fn fail(&self, error: LlmError) -> TurnOutcome {
        let retryable = error.is_retryable();
        let text = if error.is_configuration() {
            warn!(error = %error, "AI collaborator is not configured");
            NOT_CONFIGURED_TEXT.to_string()
        } else if error.is_rate_limit()
            && let Some(wait) = error.retry_after()
        {
            warn!(error = %error, wait_secs = wait.as_secs(), "AI turn rate limited");
            rate_limited_text(wait.as_secs())
        } else {
            warn!(error = %error, retryable, "AI turn failed");
            GENERATION_FAILED_TEXT.to_string()
        };
        let turn = ConversationTurn::local(text);
        self.push(turn.clone()).await;
        TurnOutcome::Failed { turn, retryable }
    }

    /// Count one successful turn locally and at the profile store
    async fn count_interaction(&self, user_id: &str) {
        let usage = {
            let mut usage = self.usage.lock().await;
            usage.record_interaction();
            *usage
        };
        self.events.emit(SessionEvent::UsageIncremented { usage });

        if let Err(e) = self.profile.increment_usage(user_id).await {
            warn!(%user_id, error = %e, "Failed to record usage at profile store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryProfileStore, StaticCurriculum};
    use crate::domain::{ContextConfiguration, SubscriptionTier};
    use crate::llm::client::mock::{MockLlmClient, MockReply};
    use crate::llm::{CompletionResponse, TokenUsage};

    struct Fixture {
        engine: ConversationEngine,
        llm: Arc<MockLlmClient>,
        profile: Arc<InMemoryProfileStore>,
        context: Mutex<ContextStore>,
    }

    fn fixture(replies: Vec<MockReply>, usage: UsageState) -> Fixture {
        let llm = Arc::new(MockLlmClient::new(replies));
        let profile = Arc::new(InMemoryProfileStore::with_usage("u1", usage));
        let curriculum = Arc::new(StaticCurriculum::new().with_module("MOD_MATH", "Zahl und Variable"));
        let engine = ConversationEngine::new(
            llm.clone(),
            curriculum,
            profile.clone(),
            UsagePolicy::default(),
            PromptLimits::default(),
            EventBus::new(),
        );
        Fixture {
            engine,
            llm,
            profile,
            context: Mutex::new(ContextStore::seeded(ContextConfiguration::new(["MOD_MATH"], "cycle2", ""))),
        }
    }

    #[tokio::test]
    async fn test_successful_turn_appends_two_turns_and_counts_once() {
        let usage = UsageState::new(SubscriptionTier::Free, 1);
        let f = fixture(vec![MockReply::Text("<thinking>Plan</thinking>## Lektion".to_string())], usage);
        f.engine.set_usage(usage).await;

        let outcome = f.engine.process_turn("u1", &f.context, "  Erstelle eine Lektion ").await.unwrap();

        let turns = f.engine.turns().await;
        assert_eq!(turns.len(), 2);
        assert!(turns[0].is_user());
        assert_eq!(turns[0].text, "Erstelle eine Lektion");
        assert_eq!(turns[1].text, "## Lektion");
        assert_eq!(turns[1].thought.as_deref(), Some("Plan"));
        assert_eq!(outcome, TurnOutcome::Completed(turns[1].clone()));

        assert_eq!(f.engine.usage().await.interaction_count, 2);
        assert_eq!(f.profile.usage_of("u1").await.interaction_count, 2);
        assert_eq!(f.engine.gate().current(), Activity::Idle);
    }

    #[tokio::test]
    async fn test_prompt_is_grounded_in_active_context() {
        let f = fixture(vec![MockReply::Text("ok".to_string())], UsageState::default());
        f.context.lock().await.toggle_module("MOD_NMG");

        f.engine.process_turn("u1", &f.context, "Hallo").await.unwrap();

        let request = &f.llm.requests()[0];
        assert!(request.system_prompt.contains("Zahl und Variable"));
        assert!(!request.system_prompt.contains("MOD_NMG"));
    }

    #[tokio::test]
    async fn test_failed_call_appends_failure_turn_and_counts_nothing() {
        let f = fixture(vec![MockReply::ApiError(503)], UsageState::default());

        let outcome = f.engine.process_turn("u1", &f.context, "Hallo").await.unwrap();

        let turns = f.engine.turns().await;
        assert_eq!(turns.len(), 2);
        assert!(turns[0].is_user());
        assert_eq!(turns[1].text, GENERATION_FAILED_TEXT);
        assert!(!turns[1].is_generated());
        assert!(matches!(outcome, TurnOutcome::Failed { retryable: true, .. }));
        assert_eq!(f.engine.usage().await.interaction_count, 0);
        assert_eq!(f.profile.usage_of("u1").await.interaction_count, 0);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retryable() {
        let f = fixture(vec![MockReply::ApiError(400)], UsageState::default());

        let outcome = f.engine.process_turn("u1", &f.context, "Hallo").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Failed { retryable: false, .. }));
        assert!(!outcome.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_tells_user_how_long_to_wait() {
        let f = fixture(vec![MockReply::RateLimited(42)], UsageState::default());

        let outcome = f.engine.process_turn("u1", &f.context, "Hallo").await.unwrap();

        assert!(outcome.is_retryable());
        let turns = f.engine.turns().await;
        assert!(turns[1].text.contains("42 Sekunden"));
        assert!(!turns[1].is_generated());
        assert_eq!(f.engine.usage().await.interaction_count, 0);
    }

    #[tokio::test]
    async fn test_safety_stop_is_a_failed_turn() {
        let response = CompletionResponse {
            content: Some("teilweise".to_string()),
            stop_reason: StopReason::Safety,
            usage: TokenUsage::default(),
        };
        let f = fixture(vec![MockReply::Response(response)], UsageState::default());

        let outcome = f.engine.process_turn("u1", &f.context, "Hallo").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Failed { retryable: false, .. }));
        assert_eq!(f.engine.turns().await[1].text, GENERATION_FAILED_TEXT);
        assert_eq!(f.engine.usage().await.interaction_count, 0);
    }

    #[tokio::test]
    async fn test_token_limit_stop_keeps_the_answer() {
        let response = CompletionResponse {
            content: Some("## Lektion (gekürzt)".to_string()),
            stop_reason: StopReason::MaxTokens,
            usage: TokenUsage {
                input_tokens: 900,
                output_tokens: 8192,
            },
        };
        let f = fixture(vec![MockReply::Response(response)], UsageState::default());

        let outcome = f.engine.process_turn("u1", &f.context, "Hallo").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Completed(ref t) if t.text == "## Lektion (gekürzt)"));
        assert_eq!(f.engine.usage().await.interaction_count, 1);
    }

    #[tokio::test]
    async fn test_missing_key_gets_its_own_message() {
        let f = fixture(vec![MockReply::MissingKey], UsageState::default());

        f.engine.process_turn("u1", &f.context, "Hallo").await.unwrap();

        let turns = f.engine.turns().await;
        assert_eq!(turns[1].text, NOT_CONFIGURED_TEXT);
        assert_eq!(f.engine.usage().await.interaction_count, 0);
    }

    #[tokio::test]
    async fn test_blocked_turn_records_nothing_and_skips_model() {
        let usage = UsageState::new(SubscriptionTier::Free, 5);
        let f = fixture(vec![MockReply::Text("nie".to_string())], usage);
        f.engine.set_usage(usage).await;

        let outcome = f.engine.process_turn("u1", &f.context, "Noch eine").await.unwrap();

        assert_eq!(outcome, TurnOutcome::Blocked { count: 5, limit: 5 });
        assert!(f.engine.turns().await.is_empty());
        assert_eq!(f.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let f = fixture(vec![], UsageState::default());
        let outcome = f.engine.process_turn("u1", &f.context, "   \n").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Ignored);
        assert!(f.engine.turns().await.is_empty());
        assert_eq!(f.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_profile_failure_does_not_fail_turn() {
        let llm = Arc::new(MockLlmClient::with_texts(&["Antwort"]));
        let engine = ConversationEngine::new(
            llm,
            Arc::new(StaticCurriculum::new()),
            Arc::new(InMemoryProfileStore::new().failing_increments()),
            UsagePolicy::default(),
            PromptLimits::default(),
            EventBus::new(),
        );
        let context = Mutex::new(ContextStore::default());

        let outcome = engine.process_turn("u1", &context, "Hallo").await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Completed(_)));
        assert_eq!(engine.usage().await.interaction_count, 1);
    }

    #[tokio::test]
    async fn test_history_is_replayed_on_next_turn() {
        let f = fixture(
            vec![MockReply::Text("erste".to_string()), MockReply::Text("zweite".to_string())],
            UsageState::default(),
        );

        f.engine.process_turn("u1", &f.context, "eins").await.unwrap();
        f.engine.process_turn("u1", &f.context, "zwei").await.unwrap();

        let second = &f.llm.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[2].content, "zwei");
        assert_eq!(f.engine.latest_generated().await.unwrap().text, "zweite");
    }
}
