//! Database module
//!
//! Provides persistence for dialog state, outstanding sign-ins and the link
//! between channel users and provider subjects.

mod schema;

pub use schema::*;

use crate::dialog::ConversationDialogState;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Dialog State ====================

    pub fn load_dialog_state(&self, conversation_id: &str) -> DbResult<Option<ConversationDialogState>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state FROM dialog_state WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_dialog_state(
        &self,
        conversation_id: &str,
        state: &ConversationDialogState,
    ) -> DbResult<()> {
        let json = serde_json::to_string(state)?;
        self.conn()?.execute(
            "INSERT INTO dialog_state (conversation_id, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![conversation_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ==================== Pending Sign-ins ====================

    pub fn insert_pending_sign_in(&self, pending: &PendingSignIn) -> DbResult<()> {
        let conversation = pending
            .conversation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()?.execute(
            "INSERT INTO pending_sign_ins (state, nonce, code_verifier, conversation_id, conversation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pending.state,
                pending.nonce,
                pending.code_verifier,
                pending.conversation.as_ref().map(|c| c.conversation_id.as_str()),
                conversation,
                pending.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Look up without consuming (used when starting the redirect)
    pub fn get_pending_sign_in(&self, state: &str) -> DbResult<Option<PendingSignIn>> {
        let conn = self.conn()?;
        Self::select_pending(&conn, state)
    }

    /// Look up and delete in one transaction so a state value is redeemed once
    pub fn take_pending_sign_in(&self, state: &str) -> DbResult<Option<PendingSignIn>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let pending = Self::select_pending(&tx, state)?;
        if pending.is_some() {
            tx.execute("DELETE FROM pending_sign_ins WHERE state = ?1", params![state])?;
        }
        tx.commit()?;
        Ok(pending)
    }

    /// Drop requests created before `cutoff`
    pub fn purge_pending_sign_ins(&self, cutoff: DateTime<Utc>) -> DbResult<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM pending_sign_ins WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    /// Revoke every outstanding request bound to a conversation
    pub fn delete_pending_for_conversation(&self, conversation_id: &str) -> DbResult<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM pending_sign_ins WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(removed)
    }

    fn select_pending(conn: &Connection, state: &str) -> DbResult<Option<PendingSignIn>> {
        let row: Option<(String, String, String, Option<String>, String)> = conn
            .query_row(
                "SELECT state, nonce, code_verifier, conversation, created_at
                 FROM pending_sign_ins WHERE state = ?1",
                params![state],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((state, nonce, code_verifier, conversation, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(PendingSignIn {
            state,
            nonce,
            code_verifier,
            conversation: conversation
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_datetime(&created_at),
        }))
    }

    // ==================== User Links ====================

    /// Remember which provider subject a channel user signed in as
    pub fn link_user(&self, user_key: &str, subject_id: &str) -> DbResult<()> {
        self.conn()?.execute(
            "INSERT INTO user_links (user_key, subject_id, linked_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_key) DO UPDATE SET subject_id = excluded.subject_id, linked_at = excluded.linked_at",
            params![user_key, subject_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn linked_subject(&self, user_key: &str) -> DbResult<Option<String>> {
        let subject = self
            .conn()?
            .query_row(
                "SELECT subject_id FROM user_links WHERE user_key = ?1",
                params![user_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(subject)
    }

    /// Returns whether a link existed
    pub fn unlink_user(&self, user_key: &str) -> DbResult<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM user_links WHERE user_key = ?1", params![user_key])?;
        Ok(removed > 0)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
