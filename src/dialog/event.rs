//! Events that drive the dialog

use crate::activity::{Inbound, TokenGrant};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Text from the user
    UserMessage { text: String },
    /// Asynchronous credential delivery, `None` when sign-in failed
    TokenDelivered { grant: Option<TokenGrant> },
    /// The provider already held a token, so the prompt completed without a card
    PromptSatisfied { grant: TokenGrant, text: String },
}

impl Event {
    /// Dialog event for an inbound activity; member joins and unsupported
    /// activities never reach the dialog
    pub fn from_inbound(inbound: Inbound) -> Option<Self> {
        match inbound {
            Inbound::Message { text } => Some(Event::UserMessage { text }),
            Inbound::TokenDelivery { grant } => Some(Event::TokenDelivered { grant }),
            Inbound::MemberJoin { .. } | Inbound::Unsupported => None,
        }
    }
}
