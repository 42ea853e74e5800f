//! Identity provider backed by the OIDC sign-in routes
//!
//! A prompt is a sign-in card pointing at `/auth/signin?state=..`; the
//! pending request is persisted so whichever process serves the callback
//! can resume the conversation.

use super::ProviderError;
use crate::activity::{Activity, ConversationRef, TokenGrant};
use crate::db::{Database, PendingSignIn};
use crate::dialog::messages;
use crate::directory::UserDirectory;
use crate::runtime::{IdentityProvider, PromptOutcome, DEFAULT_PROMPT_TIMEOUT_SECS};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

pub const DEFAULT_CONNECTION: &str = "default";

pub struct OidcIdentityProvider {
    db: Database,
    directory: Arc<UserDirectory>,
    public_url: String,
    connection: String,
    prompt_timeout: Duration,
}

impl OidcIdentityProvider {
    pub fn new(db: Database, directory: Arc<UserDirectory>, public_url: &str) -> Self {
        Self {
            db,
            directory,
            public_url: public_url.trim_end_matches('/').to_string(),
            connection: DEFAULT_CONNECTION.to_string(),
            prompt_timeout: Duration::seconds(DEFAULT_PROMPT_TIMEOUT_SECS),
        }
    }

    /// Scope user links to a named provider connection
    pub fn with_connection(mut self, name: &str) -> Self {
        self.connection = name.to_string();
        self
    }

    /// Age after which an unredeemed prompt is dropped
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    pub fn sign_in_url(&self, state: &str) -> String {
        format!("{}/auth/signin?state={state}", self.public_url)
    }

    /// Link key for the channel user under this connection
    pub fn link_key(&self, conversation: &ConversationRef) -> String {
        format!("{}:{}", self.connection, conversation.user_key())
    }

    /// Token already on file for the channel user, if still valid
    fn cached_grant(&self, conversation: &ConversationRef) -> Result<Option<TokenGrant>, ProviderError> {
        let Some(subject_id) = self.db.linked_subject(&self.link_key(conversation))? else {
            return Ok(None);
        };
        let record = self
            .directory
            .get(&subject_id)
            .map_err(|e| ProviderError::storage(e.to_string()))?;

        Ok(record
            .filter(|r| !r.token.is_expired(Utc::now()))
            .map(|r| TokenGrant {
                subject_id: r.subject_id,
                profile: r.profile,
                token: r.token.value,
                expires_at: r.token.expires_at,
            }))
    }
}

#[async_trait]
impl IdentityProvider for OidcIdentityProvider {
    async fn begin_sign_in(
        &self,
        conversation: &ConversationRef,
    ) -> Result<PromptOutcome, ProviderError> {
        if let Some(grant) = self.cached_grant(conversation)? {
            tracing::debug!(
                conv_id = %conversation.conversation_id,
                subject_id = %grant.subject_id,
                "User already signed in"
            );
            return Ok(PromptOutcome::AlreadySignedIn(grant));
        }

        let purged = self
            .db
            .purge_pending_sign_ins(Utc::now() - self.prompt_timeout)?;
        if purged > 0 {
            tracing::debug!(purged, "Dropped expired sign-in requests");
        }

        let pending = PendingSignIn::new(Some(conversation.clone()));
        self.db.insert_pending_sign_in(&pending)?;
        tracing::info!(conv_id = %conversation.conversation_id, "Issued sign-in prompt");

        Ok(PromptOutcome::CardIssued(Activity::sign_in_card(
            messages::PROMPT_TEXT,
            messages::PROMPT_TITLE,
            &self.sign_in_url(&pending.state),
        )))
    }

    async fn complete_sign_in(
        &self,
        conversation: &ConversationRef,
        grant: &TokenGrant,
    ) -> Result<(), ProviderError> {
        self.db
            .link_user(&self.link_key(conversation), &grant.subject_id)?;
        Ok(())
    }

    async fn sign_out(&self, conversation: &ConversationRef) -> Result<(), ProviderError> {
        let was_linked = self.db.unlink_user(&self.link_key(conversation))?;
        let revoked = self
            .db
            .delete_pending_for_conversation(&conversation.conversation_id)?;
        tracing::info!(
            conv_id = %conversation.conversation_id,
            was_linked,
            revoked,
            "Signed out channel user"
        );
        Ok(())
    }
}
