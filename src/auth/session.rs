//! Browser sessions for the sign-in pages

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub const SESSION_COOKIE: &str = "signin_bot_session";

#[derive(Debug, Clone, PartialEq)]
pub struct WebSession {
    pub subject_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// In-process session table keyed by the opaque cookie value
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, WebSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session and return its cookie value
    pub fn create(&self, subject_id: &str, display_name: Option<&str>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let session = WebSession {
            subject_id: subject_id.to_string(),
            display_name: display_name.map(String::from),
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), session);
        id
    }

    pub fn get(&self, id: &str) -> Option<WebSession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Returns the destroyed session, if there was one
    pub fn destroy(&self, id: &str) -> Option<WebSession> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}
