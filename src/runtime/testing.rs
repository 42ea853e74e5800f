//! Mock implementations for testing
//!
//! These mocks enable turn processor tests without real I/O.

use super::traits::*;
use crate::activity::{Activity, ConversationRef, TokenGrant};
use crate::auth::ProviderError;
use crate::dialog::ConversationDialogState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// In-memory State Store
// ============================================================================

#[derive(Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<String, ConversationDialogState>>,
    fail_loads: AtomicBool,
    pub save_count: AtomicUsize,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation_id: &str) -> Option<ConversationDialogState> {
        self.states.lock().unwrap().get(conversation_id).cloned()
    }

    pub fn set(&self, conversation_id: &str, state: ConversationDialogState) {
        self.states
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), state);
    }

    pub fn fail_loads(&self) {
        self.fail_loads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DialogStateStore for InMemoryStateStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationDialogState>, String> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err("state store unavailable".to_string());
        }
        Ok(self.get(conversation_id))
    }

    async fn save(&self, conversation_id: &str, state: &ConversationDialogState) -> Result<(), String> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        self.set(conversation_id, state.clone());
        Ok(())
    }
}

// ============================================================================
// Mock Identity Provider
// ============================================================================

/// Issues a fixed card, or a cached grant when one is configured
#[derive(Default)]
pub struct MockIdentityProvider {
    cached: Mutex<Option<TokenGrant>>,
    next_error: Mutex<Option<ProviderError>>,
    pub prompts: AtomicUsize,
    pub sign_outs: Mutex<Vec<String>>,
    pub completions: Mutex<Vec<(String, String)>>,
}

impl MockIdentityProvider {
    pub const CARD_URL: &'static str = "http://bot.test/auth/signin?state=mock";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cached_grant(grant: TokenGrant) -> Self {
        let provider = Self::default();
        *provider.cached.lock().unwrap() = Some(grant);
        provider
    }

    /// Fail the next `begin_sign_in` call
    pub fn fail_next(&self, error: ProviderError) {
        *self.next_error.lock().unwrap() = Some(error);
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn begin_sign_in(
        &self,
        _conversation: &ConversationRef,
    ) -> Result<PromptOutcome, ProviderError> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Err(error);
        }
        if let Some(grant) = self.cached.lock().unwrap().clone() {
            return Ok(PromptOutcome::AlreadySignedIn(grant));
        }
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok(PromptOutcome::CardIssued(Activity::sign_in_card(
            "Please login",
            "Login",
            Self::CARD_URL,
        )))
    }

    async fn complete_sign_in(
        &self,
        conversation: &ConversationRef,
        grant: &TokenGrant,
    ) -> Result<(), ProviderError> {
        self.completions
            .lock()
            .unwrap()
            .push((conversation.user_key(), grant.subject_id.clone()));
        Ok(())
    }

    async fn sign_out(&self, conversation: &ConversationRef) -> Result<(), ProviderError> {
        *self.cached.lock().unwrap() = None;
        self.sign_outs.lock().unwrap().push(conversation.user_key());
        Ok(())
    }
}

// ============================================================================
// Recording Connector
// ============================================================================

/// Captures proactive deliveries instead of posting them
#[derive(Default)]
pub struct RecordingConnector {
    pub delivered: Mutex<Vec<(String, Activity)>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, a)| a.text.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelConnector for RecordingConnector {
    async fn deliver(
        &self,
        conversation: &ConversationRef,
        activities: &[Activity],
    ) -> Result<(), String> {
        let mut delivered = self.delivered.lock().unwrap();
        for activity in activities {
            delivered.push((conversation.conversation_id.clone(), activity.clone()));
        }
        Ok(())
    }
}
