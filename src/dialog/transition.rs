//! Pure state transition function

use super::messages;
use super::{DialogContext, DialogState, Effect, Event};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: DialogState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: DialogState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Token delivered but no sign-in is pending")]
    NoPendingSignIn,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs; all I/O is
/// expressed as effects.
pub fn transition(
    state: &DialogState,
    context: &DialogContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // Only entry step: a message while idle issues the prompt
        (DialogState::Idle, Event::UserMessage { text }) => Ok(TransitionResult::new(
            DialogState::awaiting(context.now, context.prompt_timeout),
        )
        .with_effect(Effect::BeginPrompt { text })),

        (DialogState::Idle, Event::TokenDelivered { .. }) => Err(TransitionError::NoPendingSignIn),

        (DialogState::Idle, Event::PromptSatisfied { .. }) => Err(
            TransitionError::InvalidTransition("prompt satisfied while idle".to_string()),
        ),

        // A prompt past its deadline ends the flow on whatever arrives next
        (DialogState::AwaitingToken { .. }, _) if state.is_expired(context.now) => {
            Ok(TransitionResult::new(DialogState::Idle)
                .with_effect(Effect::send_text(messages::LOGIN_FAILED)))
        }

        // Still waiting: the message is not an answer to the prompt
        (DialogState::AwaitingToken { .. }, Event::UserMessage { .. }) => {
            Ok(TransitionResult::new(state.clone()))
        }

        (DialogState::AwaitingToken { .. }, Event::TokenDelivered { grant: Some(grant) })
            if !grant.is_expired(context.now) =>
        {
            Ok(TransitionResult::new(DialogState::Idle)
                .with_effect(Effect::RecordUser { grant })
                .with_effect(Effect::send_text(messages::LOGIN_SUCCEEDED)))
        }

        (DialogState::AwaitingToken { .. }, Event::TokenDelivered { .. }) => {
            Ok(TransitionResult::new(DialogState::Idle)
                .with_effect(Effect::send_text(messages::LOGIN_FAILED)))
        }

        // Already signed in: the message is echoed instead of prompting
        (DialogState::AwaitingToken { .. }, Event::PromptSatisfied { text, .. }) => {
            Ok(TransitionResult::new(DialogState::Idle)
                .with_effect(Effect::send_text(messages::echo(&text))))
        }
    }
}
