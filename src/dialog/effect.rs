//! Effects produced by dialog transitions

use crate::activity::TokenGrant;

/// Effects to be executed after a state transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a text message into the conversation
    SendText { text: String },

    /// Ask the identity provider for a credential prompt
    BeginPrompt { text: String },

    /// Store the signed-in user in the directory
    RecordUser { grant: TokenGrant },

    /// Invalidate the provider session for the current user
    SignOut,
}

impl Effect {
    pub fn send_text(text: impl Into<String>) -> Self {
        Effect::SendText { text: text.into() }
    }
}
