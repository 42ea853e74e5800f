//! Database schema and types

use crate::activity::ConversationRef;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS dialog_state (
    conversation_id TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_sign_ins (
    state TEXT PRIMARY KEY,
    nonce TEXT NOT NULL,
    code_verifier TEXT NOT NULL,
    conversation_id TEXT,
    conversation TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_sign_ins_created ON pending_sign_ins(created_at);
CREATE INDEX IF NOT EXISTS idx_pending_sign_ins_conversation ON pending_sign_ins(conversation_id);

CREATE TABLE IF NOT EXISTS user_links (
    user_key TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    linked_at TEXT NOT NULL
);
";

/// An authorization request that has been handed out but not yet redeemed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSignIn {
    /// Opaque value round-tripped through the provider (CSRF guard and lookup key)
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
    /// Conversation waiting on this sign-in, absent for browser-only logins
    pub conversation: Option<ConversationRef>,
    pub created_at: DateTime<Utc>,
}

impl PendingSignIn {
    pub fn new(conversation: Option<ConversationRef>) -> Self {
        Self {
            state: random_token(24),
            nonce: random_token(24),
            code_verifier: random_token(48),
            conversation,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now >= self.created_at + timeout
    }

    /// S256 PKCE challenge for the stored verifier
    pub fn code_challenge(&self) -> String {
        pkce_challenge(&self.code_verifier)
    }
}

pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// URL-safe random string from `bytes` bytes of entropy
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
