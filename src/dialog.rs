//! Sign-in dialog state machine
//!
//! Pure transitions in the Elm style: the turn processor feeds events in and
//! executes the returned effects.

mod effect;
pub mod event;
pub mod interrupt;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ConversationDialogState, DialogContext, DialogState};
pub use transition::{transition, TransitionError, TransitionResult};

/// User-facing copy
pub mod messages {
    pub const GREETING: &str =
        "Welcome to the sign-in bot. Type anything to get logged in. Type 'logout' to sign-out.";
    pub const LOGIN_SUCCEEDED: &str = "You are now logged in.";
    pub const LOGIN_FAILED: &str = "Login was not successful. Please try again.";
    pub const SIGNED_OUT: &str = "You have been signed out.";
    pub const PROMPT_TEXT: &str = "Please login";
    pub const PROMPT_TITLE: &str = "Login";
    pub const TURN_ERROR: &str = "The bot encountered an error or bug.";
    pub const TURN_ERROR_FOLLOWUP: &str =
        "To continue to run this bot, please try again in a moment.";

    pub fn echo(text: &str) -> String {
        format!("You said: {text}")
    }
}
