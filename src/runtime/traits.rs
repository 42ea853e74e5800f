//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the turn processor with mock implementations.

use crate::activity::{Activity, ConversationRef, TokenGrant};
use crate::auth::ProviderError;
use crate::db::Database;
use crate::dialog::ConversationDialogState;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Storage for per-conversation dialog state
#[async_trait]
pub trait DialogStateStore: Send + Sync {
    /// Persisted state, `None` on first contact
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationDialogState>, String>;

    async fn save(&self, conversation_id: &str, state: &ConversationDialogState) -> Result<(), String>;
}

/// Result of asking the provider for a credential prompt
#[derive(Debug, Clone, PartialEq)]
pub enum PromptOutcome {
    /// A sign-in card to send; the token arrives later on its own activity
    CardIssued(Activity),
    /// The user already holds a valid token
    AlreadySignedIn(TokenGrant),
}

/// The identity provider as seen from a conversation
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn begin_sign_in(&self, conversation: &ConversationRef)
        -> Result<PromptOutcome, ProviderError>;

    /// Bind the channel user to a grant the dialog accepted
    async fn complete_sign_in(
        &self,
        conversation: &ConversationRef,
        grant: &TokenGrant,
    ) -> Result<(), ProviderError>;

    /// Forget the user's sign-in and revoke any prompt still outstanding
    async fn sign_out(&self, conversation: &ConversationRef) -> Result<(), ProviderError>;
}

/// Outbound transport back to the channel
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn deliver(
        &self,
        conversation: &ConversationRef,
        activities: &[Activity],
    ) -> Result<(), String>;
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a dialog state store
#[derive(Clone)]
pub struct DatabaseStateStore {
    db: Database,
}

impl DatabaseStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DialogStateStore for DatabaseStateStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationDialogState>, String> {
        self.db
            .load_dialog_state(conversation_id)
            .map_err(|e| e.to_string())
    }

    async fn save(&self, conversation_id: &str, state: &ConversationDialogState) -> Result<(), String> {
        self.db
            .save_dialog_state(conversation_id, state)
            .map_err(|e| e.to_string())
    }
}

/// Posts activities to the channel's `serviceUrl`
pub struct HttpConnector {
    client: Client,
    auth_token: Option<String>,
}

impl HttpConnector {
    pub fn new(auth_token: Option<String>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client, auth_token })
    }

    fn activities_url(service_url: &str, conversation_id: &str) -> String {
        format!(
            "{}/v3/conversations/{conversation_id}/activities",
            service_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ChannelConnector for HttpConnector {
    async fn deliver(
        &self,
        conversation: &ConversationRef,
        activities: &[Activity],
    ) -> Result<(), String> {
        if activities.is_empty() {
            return Ok(());
        }
        let service_url = conversation
            .service_url
            .as_deref()
            .ok_or_else(|| "Conversation has no service URL".to_string())?;
        let url = Self::activities_url(service_url, &conversation.conversation_id);

        for activity in activities {
            let mut request = self.client.post(&url).json(activity);
            if let Some(token) = &self.auth_token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| format!("Delivery failed: {e}"))?;
            if !response.status().is_success() {
                return Err(format!("Delivery failed: HTTP {}", response.status()));
            }
        }

        tracing::debug!(
            conv_id = %conversation.conversation_id,
            count = activities.len(),
            "Delivered activities"
        );
        Ok(())
    }
}
