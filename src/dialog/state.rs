//! Dialog state types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Id of the only dialog this bot runs
pub const MAIN_DIALOG_ID: &str = "main_waterfall";

/// Steps of the main waterfall, executed one per resumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterfallStep {
    /// Issue the credential prompt
    Prompt,
    /// Consume the prompt result and report it
    Login,
}

impl WaterfallStep {
    pub fn index(self) -> u32 {
        match self {
            WaterfallStep::Prompt => 0,
            WaterfallStep::Login => 1,
        }
    }
}

/// Resumption state of the sign-in dialog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogState {
    /// No flow active
    #[default]
    Idle,
    /// A credential prompt is outstanding
    AwaitingToken {
        prompted_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl DialogState {
    pub fn awaiting(now: DateTime<Utc>, timeout: Duration) -> Self {
        DialogState::AwaitingToken {
            prompted_at: now,
            expires_at: now + timeout,
        }
    }

    pub fn active_dialog_id(&self) -> Option<&'static str> {
        match self {
            DialogState::Idle => None,
            DialogState::AwaitingToken { .. } => Some(MAIN_DIALOG_ID),
        }
    }

    /// Step the waterfall resumes at
    pub fn step_index(&self) -> u32 {
        match self {
            DialogState::Idle => WaterfallStep::Prompt.index(),
            DialogState::AwaitingToken { .. } => WaterfallStep::Login.index(),
        }
    }

    pub fn waiting_for_token(&self) -> bool {
        matches!(self, DialogState::AwaitingToken { .. })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            DialogState::Idle => false,
            DialogState::AwaitingToken { expires_at, .. } => now >= *expires_at,
        }
    }
}

/// Everything persisted for one conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConversationDialogState {
    #[serde(default)]
    pub dialog: DialogState,
    /// Whether the one-time greeting went out
    #[serde(default)]
    pub greeted: bool,
}

/// Inputs to a transition that are not part of the state
#[derive(Debug, Clone)]
pub struct DialogContext {
    pub conversation_id: String,
    pub now: DateTime<Utc>,
    pub prompt_timeout: Duration,
}

impl DialogContext {
    pub fn new(conversation_id: &str, now: DateTime<Utc>, prompt_timeout: Duration) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            now,
            prompt_timeout,
        }
    }
}
