//! Per-turn context: the inbound activity plus buffered replies

use crate::activity::{Activity, ConversationRef};
use serde_json::Value;

pub const TURN_ERROR_TRACE_NAME: &str = "OnTurnError Trace";
pub const TURN_ERROR_LABEL: &str = "TurnError";
pub const TURN_ERROR_VALUE_TYPE: &str = "https://www.botframework.com/schemas/error";

pub struct TurnContext {
    activity: Activity,
    conversation: ConversationRef,
    outbound: Vec<Activity>,
}

impl TurnContext {
    /// `None` when the activity names no conversation
    pub fn new(activity: Activity) -> Option<Self> {
        let conversation = activity.conversation_ref()?;
        Some(Self {
            activity,
            conversation,
            outbound: Vec::new(),
        })
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn conversation(&self) -> &ConversationRef {
        &self.conversation
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation.conversation_id
    }

    /// Queue an activity as a reply into this conversation
    pub fn send(&mut self, activity: Activity) {
        let reply = activity.addressed_to(&self.conversation, self.activity.id.as_deref());
        self.outbound.push(reply);
    }

    pub fn send_text(&mut self, text: &str) {
        self.send(Activity::message(text));
    }

    pub fn send_error_trace(&mut self, error: &str) {
        self.send(Activity::trace(
            TURN_ERROR_TRACE_NAME,
            Value::String(error.to_string()),
            TURN_ERROR_VALUE_TYPE,
            TURN_ERROR_LABEL,
        ));
    }

    pub fn outbound(&self) -> &[Activity] {
        &self.outbound
    }

    pub fn into_parts(self) -> (ConversationRef, Vec<Activity>) {
        (self.conversation, self.outbound)
    }
}
