//! Channel activities
//!
//! Wire types for the webhook envelope plus the tagged view of an inbound
//! activity that the turn processor dispatches on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event name carrying an asynchronous credential delivery
pub const TOKEN_RESPONSE_EVENT: &str = "tokens/response";

/// Invoke name some channels use instead of `tokens/response`
pub const VERIFY_STATE_INVOKE: &str = "signin/verifyState";

/// Delivery mode asking for replies in the HTTP response body
pub const EXPECT_REPLIES: &str = "expectReplies";

/// Attachment content type for sign-in cards
pub const SIGNIN_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.signin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    #[default]
    Message,
    ConversationUpdate,
    Event,
    Invoke,
    Trace,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConversationAccount {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    pub content: Value,
}

/// One unit of conversation, inbound or outbound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type", default)]
    pub activity_type: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_added: Vec<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<String>,
}

/// Credential handed to a waiting conversation once sign-in completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub subject_id: String,
    #[serde(default)]
    pub profile: Map<String, Value>,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Display name from the usual OIDC claims
    pub fn display_name(&self) -> Option<&str> {
        ["name", "preferred_username", "email"]
            .iter()
            .find_map(|claim| self.profile.get(*claim).and_then(Value::as_str))
    }
}

/// Where a conversation lives, enough to address replies to it later
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub conversation_id: String,
    pub channel_id: String,
    pub service_url: Option<String>,
    pub user: ChannelAccount,
    pub bot: ChannelAccount,
}

impl ConversationRef {
    /// Key identifying the channel user across conversations
    pub fn user_key(&self) -> String {
        format!("{}:{}", self.channel_id, self.user.id)
    }
}

/// Inbound activity kinds the bot reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message { text: String },
    MemberJoin { members: Vec<ChannelAccount> },
    TokenDelivery { grant: Option<TokenGrant> },
    Unsupported,
}

impl Activity {
    /// Plain text message
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            activity_type: ActivityType::Message,
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Diagnostic trace, shown by emulators but not end users
    pub fn trace(name: &str, value: Value, value_type: &str, label: &str) -> Self {
        Self {
            activity_type: ActivityType::Trace,
            name: Some(name.to_string()),
            value: Some(value),
            value_type: Some(value_type.to_string()),
            label: Some(label.to_string()),
            ..Self::default()
        }
    }

    /// Message carrying a sign-in card with a single login button
    pub fn sign_in_card(text: &str, title: &str, url: &str) -> Self {
        Self {
            activity_type: ActivityType::Message,
            attachments: vec![Attachment {
                content_type: SIGNIN_CARD_CONTENT_TYPE.to_string(),
                content: serde_json::json!({
                    "text": text,
                    "buttons": [{ "type": "signin", "title": title, "value": url }],
                }),
            }],
            ..Self::default()
        }
    }

    /// Synthesized credential delivery addressed to a waiting conversation
    pub fn token_response(conversation: &ConversationRef, grant: Option<&TokenGrant>) -> Self {
        Self {
            activity_type: ActivityType::Event,
            id: Some(uuid::Uuid::new_v4().to_string()),
            timestamp: Some(Utc::now()),
            channel_id: Some(conversation.channel_id.clone()),
            service_url: conversation.service_url.clone(),
            from: Some(conversation.user.clone()),
            recipient: Some(conversation.bot.clone()),
            conversation: Some(ConversationAccount {
                id: conversation.conversation_id.clone(),
            }),
            name: Some(TOKEN_RESPONSE_EVENT.to_string()),
            value: grant.map(|g| serde_json::to_value(g).unwrap_or(Value::Null)),
            ..Self::default()
        }
    }

    pub fn expects_replies(&self) -> bool {
        self.delivery_mode.as_deref() == Some(EXPECT_REPLIES)
    }

    /// Sign-in link carried by a card attachment, if any
    #[cfg(test)]
    pub fn sign_in_url(&self) -> Option<&str> {
        self.attachments
            .iter()
            .find(|a| a.content_type == SIGNIN_CARD_CONTENT_TYPE)
            .and_then(|a| a.content["buttons"][0]["value"].as_str())
    }

    /// Reference to the conversation this activity belongs to
    pub fn conversation_ref(&self) -> Option<ConversationRef> {
        let conversation = self.conversation.as_ref().filter(|c| !c.id.is_empty())?;
        Some(ConversationRef {
            conversation_id: conversation.id.clone(),
            channel_id: self.channel_id.clone().unwrap_or_default(),
            service_url: self.service_url.clone(),
            user: self.from.clone().unwrap_or_default(),
            bot: self.recipient.clone().unwrap_or_default(),
        })
    }

    /// Fill in addressing so this activity replies into `conversation`
    pub fn addressed_to(mut self, conversation: &ConversationRef, reply_to: Option<&str>) -> Self {
        self.channel_id = Some(conversation.channel_id.clone());
        self.service_url.clone_from(&conversation.service_url);
        self.from = Some(conversation.bot.clone());
        self.recipient = Some(conversation.user.clone());
        self.conversation = Some(ConversationAccount {
            id: conversation.conversation_id.clone(),
        });
        self.reply_to_id = reply_to.map(String::from);
        self.timestamp = Some(Utc::now());
        self
    }

    /// Tagged view used for dispatch
    pub fn classify(&self) -> Inbound {
        match self.activity_type {
            ActivityType::Message => Inbound::Message {
                text: self.text.clone().unwrap_or_default(),
            },
            ActivityType::ConversationUpdate if !self.members_added.is_empty() => {
                Inbound::MemberJoin {
                    members: self.members_added.clone(),
                }
            }
            ActivityType::Event if self.name.as_deref() == Some(TOKEN_RESPONSE_EVENT) => {
                Inbound::TokenDelivery {
                    grant: self.grant_from_value(),
                }
            }
            ActivityType::Invoke if self.name.as_deref() == Some(VERIFY_STATE_INVOKE) => {
                Inbound::TokenDelivery {
                    grant: self.grant_from_value(),
                }
            }
            _ => Inbound::Unsupported,
        }
    }

    fn grant_from_value(&self) -> Option<TokenGrant> {
        let value = self.value.clone()?;
        serde_json::from_value::<TokenGrant>(value)
            .ok()
            .filter(|g| !g.token.is_empty() && !g.subject_id.is_empty())
    }
}
