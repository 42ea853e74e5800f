//! Turn processor
//!
//! Loads the conversation's dialog state, runs the logout interrupt and the
//! dialog transition, executes effects, then saves. Errors are reported into
//! the turn rather than bubbled to the transport.

use super::traits::{DialogStateStore, IdentityProvider, PromptOutcome};
use super::turn::TurnContext;
use crate::activity::{Activity, ConversationRef, Inbound};
use crate::auth::{ProviderError, ProviderErrorKind};
use crate::config::ConfigError;
use crate::dialog::{
    interrupt, messages, transition, ConversationDialogState, DialogContext, DialogState, Effect,
    Event, TransitionError,
};
use crate::directory::{AccessToken, DirectoryError, UserDirectory};
use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const DEFAULT_PROMPT_TIMEOUT_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Activity does not name a conversation")]
    MissingConversation,
    #[error("Dialog state store failed: {0}")]
    Store(String),
    #[error("Identity provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("User directory failed: {0}")]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Everything a finished turn produced
#[derive(Debug)]
pub struct TurnOutcome {
    pub conversation: ConversationRef,
    pub outbound: Vec<Activity>,
    pub state: ConversationDialogState,
}

pub struct TurnProcessor {
    store: Arc<dyn DialogStateStore>,
    provider: Arc<dyn IdentityProvider>,
    directory: Arc<UserDirectory>,
    prompt_timeout: Duration,
    /// One async lock per conversation with a turn in flight
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Default)]
pub struct TurnProcessorBuilder {
    store: Option<Arc<dyn DialogStateStore>>,
    provider: Option<Arc<dyn IdentityProvider>>,
    directory: Option<Arc<UserDirectory>>,
    prompt_timeout: Option<Duration>,
}

impl TurnProcessorBuilder {
    pub fn state_store(mut self, store: Arc<dyn DialogStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn directory(mut self, directory: Arc<UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<TurnProcessor, ConfigError> {
        Ok(TurnProcessor {
            store: self
                .store
                .ok_or(ConfigError::MissingDependency("dialog state store"))?,
            provider: self
                .provider
                .ok_or(ConfigError::MissingDependency("identity provider"))?,
            directory: self
                .directory
                .ok_or(ConfigError::MissingDependency("user directory"))?,
            prompt_timeout: self
                .prompt_timeout
                .unwrap_or_else(|| Duration::seconds(DEFAULT_PROMPT_TIMEOUT_SECS)),
            locks: Mutex::new(HashMap::new()),
        })
    }
}

impl TurnProcessor {
    pub fn builder() -> TurnProcessorBuilder {
        TurnProcessorBuilder::default()
    }

    pub fn prompt_timeout(&self) -> Duration {
        self.prompt_timeout
    }

    /// Handle one inbound activity to completion
    ///
    /// Only an activity without a conversation is an error here; every other
    /// failure is reported into the returned outbound activities.
    pub async fn process(&self, activity: Activity) -> Result<TurnOutcome, TurnError> {
        let turn = TurnContext::new(activity).ok_or(TurnError::MissingConversation)?;
        let conv_id = turn.conversation_id().to_string();

        let lock = self.conversation_lock(&conv_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.run_turn(turn).await
        };
        drop(lock);
        self.release_lock(&conv_id);

        Ok(outcome)
    }

    async fn run_turn(&self, mut turn: TurnContext) -> TurnOutcome {
        let conv_id = turn.conversation_id().to_string();

        let loaded = match self.store.load(&conv_id).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                // Unknown prior state is never overwritten
                let error = TurnError::Store(e);
                tracing::error!(conv_id = %conv_id, error = %error, "Failed to load dialog state");
                Self::report_error(&mut turn, &error);
                let (conversation, outbound) = turn.into_parts();
                return TurnOutcome {
                    conversation,
                    outbound,
                    state: ConversationDialogState::default(),
                };
            }
        };

        let inbound = turn.activity().classify();
        let mut state = loaded.clone();
        Self::greet(&mut turn, &mut state, &inbound);

        match self.run_dialog(&mut turn, &loaded.dialog, inbound).await {
            Ok(dialog) => state.dialog = dialog,
            Err(error) => {
                tracing::error!(conv_id = %conv_id, error = %error, "Turn failed");
                Self::report_error(&mut turn, &error);
            }
        }

        if let Err(e) = self.store.save(&conv_id, &state).await {
            let error = TurnError::Store(e);
            tracing::error!(conv_id = %conv_id, error = %error, "Failed to save dialog state");
            Self::report_error(&mut turn, &error);
        }

        tracing::debug!(
            conv_id = %conv_id,
            dialog = state.dialog.active_dialog_id().unwrap_or("none"),
            step = state.dialog.step_index(),
            outbound = turn.outbound().len(),
            "Turn complete"
        );

        let (conversation, outbound) = turn.into_parts();
        TurnOutcome {
            conversation,
            outbound,
            state,
        }
    }

    /// Greeting goes out once, on the first member join that is not the bot
    /// or on first message contact
    fn greet(turn: &mut TurnContext, state: &mut ConversationDialogState, inbound: &Inbound) {
        if state.greeted {
            return;
        }
        let should_greet = match inbound {
            Inbound::MemberJoin { members } => {
                let bot_id = &turn.conversation().bot.id;
                members.iter().any(|m| &m.id != bot_id)
            }
            Inbound::Message { .. } => true,
            Inbound::TokenDelivery { .. } | Inbound::Unsupported => false,
        };
        if should_greet {
            turn.send_text(messages::GREETING);
            state.greeted = true;
        }
    }

    async fn run_dialog(
        &self,
        turn: &mut TurnContext,
        dialog: &DialogState,
        inbound: Inbound,
    ) -> Result<DialogState, TurnError> {
        let context = DialogContext::new(turn.conversation_id(), Utc::now(), self.prompt_timeout);

        let result = match interrupt::check(dialog, &inbound) {
            Some(result) => result,
            None => {
                let Some(event) = Event::from_inbound(inbound) else {
                    return Ok(dialog.clone());
                };
                match transition(dialog, &context, event) {
                    Ok(result) => result,
                    Err(TransitionError::NoPendingSignIn) => {
                        tracing::warn!(
                            conv_id = %context.conversation_id,
                            "Ignoring token delivery with no pending sign-in"
                        );
                        return Ok(dialog.clone());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let mut state = result.new_state;
        let mut effects: VecDeque<Effect> = result.effects.into();
        while let Some(effect) = effects.pop_front() {
            if let Some(event) = self.execute_effect(turn, effect).await? {
                let next = transition(&state, &context, event)?;
                state = next.new_state;
                effects.extend(next.effects);
            }
        }
        Ok(state)
    }

    /// Execute one effect, returning a follow-up event when the effect
    /// resolves the dialog step on its own
    async fn execute_effect(
        &self,
        turn: &mut TurnContext,
        effect: Effect,
    ) -> Result<Option<Event>, TurnError> {
        match effect {
            Effect::SendText { text } => {
                turn.send_text(&text);
                Ok(None)
            }

            Effect::BeginPrompt { text } => {
                let outcome = self.provider.begin_sign_in(turn.conversation()).await;
                match outcome {
                    Ok(PromptOutcome::CardIssued(card)) => {
                        turn.send(card);
                        Ok(None)
                    }
                    Ok(PromptOutcome::AlreadySignedIn(grant)) => {
                        Ok(Some(Event::PromptSatisfied { grant, text }))
                    }
                    Err(e)
                        if matches!(
                            e.kind,
                            ProviderErrorKind::Rejected | ProviderErrorKind::Expired
                        ) =>
                    {
                        tracing::warn!(
                            conv_id = %turn.conversation_id(),
                            error = %e,
                            "Provider refused sign-in prompt"
                        );
                        Ok(Some(Event::TokenDelivered { grant: None }))
                    }
                    Err(e) => Err(e.into()),
                }
            }

            Effect::RecordUser { grant } => {
                self.directory.put(
                    &grant.subject_id,
                    grant.profile.clone(),
                    AccessToken::new(grant.token.clone(), grant.expires_at),
                )?;
                self.provider
                    .complete_sign_in(turn.conversation(), &grant)
                    .await?;
                tracing::info!(
                    conv_id = %turn.conversation_id(),
                    subject_id = %grant.subject_id,
                    "User signed in"
                );
                Ok(None)
            }

            Effect::SignOut => {
                self.provider.sign_out(turn.conversation()).await?;
                Ok(None)
            }
        }
    }

    fn report_error(turn: &mut TurnContext, error: &TurnError) {
        turn.send_error_trace(&error.to_string());
        turn.send_text(messages::TURN_ERROR);
        turn.send_text(messages::TURN_ERROR_FOLLOWUP);
    }

    fn conversation_lock(&self, conv_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(conv_id.to_string()).or_default().clone()
    }

    /// Drop lock entries no other turn is holding
    fn release_lock(&self, conv_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(conv_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(conv_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityType, ChannelAccount, ConversationAccount, TokenGrant};
    use crate::runtime::testing::{InMemoryStateStore, MockIdentityProvider};
    use crate::runtime::turn::TURN_ERROR_TRACE_NAME;
    use serde_json::Map;
    use std::sync::atomic::Ordering;

    const CONV: &str = "conv-1";

    struct Harness {
        processor: TurnProcessor,
        store: Arc<InMemoryStateStore>,
        provider: Arc<MockIdentityProvider>,
        directory: Arc<UserDirectory>,
    }

    fn harness_with(provider: MockIdentityProvider) -> Harness {
        let store = Arc::new(InMemoryStateStore::new());
        let provider = Arc::new(provider);
        let directory = Arc::new(UserDirectory::new());
        let processor = TurnProcessor::builder()
            .state_store(store.clone())
            .identity_provider(provider.clone())
            .directory(directory.clone())
            .build()
            .unwrap();
        Harness {
            processor,
            store,
            provider,
            directory,
        }
    }

    fn harness() -> Harness {
        harness_with(MockIdentityProvider::new())
    }

    fn inbound(activity_type: ActivityType) -> Activity {
        Activity {
            activity_type,
            id: Some("in-1".to_string()),
            channel_id: Some("test".to_string()),
            from: Some(ChannelAccount::new("user-1")),
            recipient: Some(ChannelAccount::new("bot")),
            conversation: Some(ConversationAccount {
                id: CONV.to_string(),
            }),
            ..Activity::default()
        }
    }

    fn message(text: &str) -> Activity {
        Activity {
            text: Some(text.to_string()),
            ..inbound(ActivityType::Message)
        }
    }

    fn members_added(ids: &[&str]) -> Activity {
        Activity {
            members_added: ids.iter().map(|id| ChannelAccount::new(*id)).collect(),
            ..inbound(ActivityType::ConversationUpdate)
        }
    }

    fn grant() -> TokenGrant {
        TokenGrant {
            subject_id: "oid-1".to_string(),
            profile: Map::new(),
            token: "secret".to_string(),
            expires_at: None,
        }
    }

    fn token_event(grant: Option<&TokenGrant>) -> Activity {
        let conversation = message("").conversation_ref().unwrap();
        Activity::token_response(&conversation, grant)
    }

    fn texts(outcome: &TurnOutcome) -> Vec<&str> {
        outcome
            .outbound
            .iter()
            .filter_map(|a| a.text.as_deref())
            .collect()
    }

    fn has_card(outcome: &TurnOutcome) -> bool {
        outcome.outbound.iter().any(|a| a.sign_in_url().is_some())
    }

    #[test]
    fn test_builder_requires_dependencies() {
        let result = TurnProcessor::builder()
            .directory(Arc::new(UserDirectory::new()))
            .identity_provider(Arc::new(MockIdentityProvider::new()))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::MissingDependency("dialog state store"))
        ));

        let result = TurnProcessor::builder()
            .state_store(Arc::new(InMemoryStateStore::new()))
            .directory(Arc::new(UserDirectory::new()))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::MissingDependency("identity provider"))
        ));
    }

    #[tokio::test]
    async fn test_round_trip_greeting_prompt_success() {
        let h = harness();

        let joined = h.processor.process(members_added(&["bot", "user-1"])).await.unwrap();
        assert_eq!(texts(&joined), vec![messages::GREETING]);

        let first = h.processor.process(message("hi")).await.unwrap();
        assert!(texts(&first).is_empty());
        assert!(has_card(&first));
        assert!(first.state.dialog.waiting_for_token());

        let done = h.processor.process(token_event(Some(&grant()))).await.unwrap();
        assert_eq!(texts(&done), vec![messages::LOGIN_SUCCEEDED]);
        assert_eq!(done.state.dialog, DialogState::Idle);

        let record = h.directory.get("oid-1").unwrap().unwrap();
        assert_eq!(record.token.value, "secret");
        assert_eq!(h.provider.prompt_count(), 1);
        assert_eq!(
            h.provider.completions.lock().unwrap().as_slice(),
            [("test:user-1".to_string(), "oid-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_messages_while_awaiting_do_not_reprompt() {
        let h = harness();
        h.processor.process(message("hi")).await.unwrap();

        for text in ["hello?", "anyone", ""] {
            let outcome = h.processor.process(message(text)).await.unwrap();
            assert!(outcome.outbound.is_empty());
            assert!(outcome.state.dialog.waiting_for_token());
        }
        assert_eq!(h.provider.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_token_fails_then_reprompts() {
        let h = harness();
        h.processor.process(message("hi")).await.unwrap();

        let failed = h.processor.process(token_event(None)).await.unwrap();
        assert_eq!(texts(&failed), vec![messages::LOGIN_FAILED]);
        assert_eq!(failed.state.dialog, DialogState::Idle);

        let retry = h.processor.process(message("again")).await.unwrap();
        assert!(has_card(&retry));
        assert_eq!(h.provider.prompt_count(), 2);
    }

    #[tokio::test]
    async fn test_logout_while_awaiting() {
        let h = harness();
        h.processor.process(message("hi")).await.unwrap();

        let outcome = h.processor.process(message("  LOGOUT ")).await.unwrap();
        assert_eq!(texts(&outcome), vec![messages::SIGNED_OUT]);
        assert_eq!(outcome.state.dialog, DialogState::Idle);
        assert_eq!(
            h.provider.sign_outs.lock().unwrap().as_slice(),
            ["test:user-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_first_message_logout_greets_and_signs_out() {
        let h = harness();
        let outcome = h.processor.process(message("logout")).await.unwrap();
        assert_eq!(
            texts(&outcome),
            vec![messages::GREETING, messages::SIGNED_OUT]
        );
        assert_eq!(h.provider.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_greeting_sent_once() {
        let h = harness();
        h.processor.process(members_added(&["user-1"])).await.unwrap();
        let again = h.processor.process(members_added(&["user-2"])).await.unwrap();
        assert!(again.outbound.is_empty());

        let first = h.processor.process(message("hi")).await.unwrap();
        assert!(!texts(&first).contains(&messages::GREETING));
    }

    #[tokio::test]
    async fn test_bot_only_join_is_not_greeted() {
        let h = harness();
        let outcome = h.processor.process(members_added(&["bot"])).await.unwrap();
        assert!(outcome.outbound.is_empty());
        assert!(!outcome.state.greeted);
    }

    #[tokio::test]
    async fn test_cached_token_echoes_message() {
        let h = harness_with(MockIdentityProvider::with_cached_grant(grant()));
        let outcome = h.processor.process(message("ping")).await.unwrap();

        assert_eq!(texts(&outcome), vec![messages::GREETING, "You said: ping"]);
        assert_eq!(outcome.state.dialog, DialogState::Idle);
        assert!(!has_card(&outcome));
    }

    #[tokio::test]
    async fn test_provider_failure_reports_turn_error() {
        let h = harness();
        h.provider
            .fail_next(ProviderError::network("connection refused"));

        let outcome = h.processor.process(message("hi")).await.unwrap();
        let trace = outcome
            .outbound
            .iter()
            .find(|a| a.activity_type == ActivityType::Trace)
            .unwrap();
        assert_eq!(trace.name.as_deref(), Some(TURN_ERROR_TRACE_NAME));
        assert_eq!(
            texts(&outcome),
            vec![
                messages::GREETING,
                messages::TURN_ERROR,
                messages::TURN_ERROR_FOLLOWUP
            ]
        );

        // The failed step does not advance the dialog but the turn still saves
        let saved = h.store.get(CONV).unwrap();
        assert_eq!(saved.dialog, DialogState::Idle);
        assert!(saved.greeted);
        assert_eq!(h.store.save_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_rejection_is_login_failure() {
        let h = harness();
        h.provider.fail_next(ProviderError::rejected("access_denied"));

        let outcome = h.processor.process(message("hi")).await.unwrap();
        assert_eq!(
            texts(&outcome),
            vec![messages::GREETING, messages::LOGIN_FAILED]
        );
        assert_eq!(outcome.state.dialog, DialogState::Idle);
    }

    #[tokio::test]
    async fn test_stray_token_is_ignored() {
        let h = harness();
        let outcome = h.processor.process(token_event(Some(&grant()))).await.unwrap();
        assert!(outcome.outbound.is_empty());
        assert_eq!(h.directory.len(), 0);
        assert!(h.provider.completions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_after_logout_is_not_accepted() {
        let h = harness();
        h.processor.process(message("hi")).await.unwrap();
        h.processor.process(message("logout")).await.unwrap();

        let late = h.processor.process(token_event(Some(&grant()))).await.unwrap();
        assert!(late.outbound.is_empty());
        assert_eq!(late.state.dialog, DialogState::Idle);
        assert!(h.directory.get("oid-1").unwrap().is_none());
        assert!(h.provider.completions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_skips_save() {
        let h = harness();
        h.store.fail_loads();

        let outcome = h.processor.process(message("hi")).await.unwrap();
        assert!(texts(&outcome).contains(&messages::TURN_ERROR));
        assert_eq!(h.store.save_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_prompt_ends_flow() {
        let h = harness();
        let prompted = Utc::now() - Duration::seconds(DEFAULT_PROMPT_TIMEOUT_SECS + 1);
        h.store.set(
            CONV,
            ConversationDialogState {
                dialog: DialogState::awaiting(prompted, Duration::seconds(DEFAULT_PROMPT_TIMEOUT_SECS)),
                greeted: true,
            },
        );

        let outcome = h.processor.process(token_event(Some(&grant()))).await.unwrap();
        assert_eq!(texts(&outcome), vec![messages::LOGIN_FAILED]);
        assert!(h.directory.get("oid-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_resumes_across_processors() {
        let h = harness();
        h.processor.process(message("hi")).await.unwrap();

        // A second processor sharing only the store completes the flow
        let other = TurnProcessor::builder()
            .state_store(h.store.clone())
            .identity_provider(Arc::new(MockIdentityProvider::new()))
            .directory(h.directory.clone())
            .build()
            .unwrap();
        let done = other.process(token_event(Some(&grant()))).await.unwrap();
        assert_eq!(texts(&done), vec![messages::LOGIN_SUCCEEDED]);
    }

    #[tokio::test]
    async fn test_missing_conversation_is_rejected() {
        let h = harness();
        let result = h.processor.process(Activity::message("orphan")).await;
        assert!(matches!(result, Err(TurnError::MissingConversation)));
    }

    #[tokio::test]
    async fn test_concurrent_turns_serialize_per_conversation() {
        let h = Arc::new(harness());
        let mut handles = Vec::new();
        for i in 0..8 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.processor.process(message(&format!("msg {i}"))).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(h.provider.prompt_count(), 1);
        assert_eq!(h.processor.tracked_locks(), 0);
    }
}
