//! Logout interrupt, checked ahead of every other turn-processing path

use super::messages;
use super::{DialogState, Effect, TransitionResult};
use crate::activity::Inbound;

pub const LOGOUT_COMMAND: &str = "logout";

pub fn is_logout(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(LOGOUT_COMMAND)
}

/// Returns the interrupting transition when the activity is a logout
/// command; the caller skips the rest of the turn in that case.
pub fn check(state: &DialogState, inbound: &Inbound) -> Option<TransitionResult> {
    let Inbound::Message { text } = inbound else {
        return None;
    };
    if !is_logout(text) {
        return None;
    }

    tracing::debug!(was_waiting = state.waiting_for_token(), "Logout interrupt");
    Some(
        TransitionResult::new(DialogState::Idle)
            .with_effect(Effect::SignOut)
            .with_effect(Effect::send_text(messages::SIGNED_OUT)),
    )
}
