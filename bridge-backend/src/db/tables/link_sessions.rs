//! Pending link session operations
//!
//! Sessions are read-once: `take_pending_link_session` looks up and deletes
//! under one connection lock, so a session id can be redeemed at most once.

use chrono::Utc;
use rusqlite::Result as SqliteResult;

use super::super::Database;
use super::accounts::parse_ts;
use crate::models::PendingLinkSession;

impl Database {
    pub fn save_pending_link_session(
        &self,
        session_id: &str,
        chat_user_id: &str,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending_link_sessions (session_id, chat_user_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![session_id, chat_user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Consume a session: returns it and deletes the row in one locked step.
    /// A second call with the same id returns `None`.
    pub fn take_pending_link_session(
        &self,
        session_id: &str,
    ) -> SqliteResult<Option<PendingLinkSession>> {
        let conn = self.conn.lock().unwrap();

        let session = {
            let mut stmt = conn.prepare(
                "SELECT session_id, chat_user_id, created_at
                 FROM pending_link_sessions WHERE session_id = ?1",
            )?;
            stmt.query_row([session_id], |row| {
                let created_at_str: String = row.get(2)?;
                Ok(PendingLinkSession {
                    session_id: row.get(0)?,
                    chat_user_id: row.get(1)?,
                    created_at: parse_ts(&created_at_str),
                })
            })
            .ok()
        };

        if session.is_some() {
            conn.execute(
                "DELETE FROM pending_link_sessions WHERE session_id = ?1",
                [session_id],
            )?;
        }

        Ok(session)
    }

    /// Idempotent cleanup of every session the chat user opened.
    pub fn delete_pending_link_sessions_for_chat_user(
        &self,
        chat_user_id: &str,
    ) -> SqliteResult<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM pending_link_sessions WHERE chat_user_id = ?1",
            [chat_user_id],
        )
    }
}
