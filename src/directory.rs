//! User directory
//!
//! Process-lifetime map from identity-provider subject id to the most recent
//! profile and token seen for that user.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Subject id must not be empty")]
    EmptySubjectId,
    #[error("User directory lock poisoned")]
    Poisoned,
}

/// Access token as handed out by the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub subject_id: String,
    pub profile: Map<String, Value>,
    pub token: AccessToken,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `subject_id`
    pub fn put(
        &self,
        subject_id: &str,
        profile: Map<String, Value>,
        token: AccessToken,
    ) -> Result<(), DirectoryError> {
        if subject_id.trim().is_empty() {
            return Err(DirectoryError::EmptySubjectId);
        }

        let record = UserRecord {
            subject_id: subject_id.to_string(),
            profile,
            token,
            last_updated: Utc::now(),
        };
        self.users
            .write()
            .map_err(|_| DirectoryError::Poisoned)?
            .insert(subject_id.to_string(), record);

        tracing::debug!(subject_id = %subject_id, "Stored user record");
        Ok(())
    }

    pub fn get(&self, subject_id: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self
            .users
            .read()
            .map_err(|_| DirectoryError::Poisoned)?
            .get(subject_id)
            .cloned())
    }

    pub fn len(&self) -> usize {
        self.users.read().map_or(0, |users| users.len())
    }
}
