//! Account linking sessions.
//!
//! A session binds a chat user to one OAuth exchange. Sessions are
//! read-once: redemption consumes the row, so a session id can succeed at
//! most once. Every redemption failure collapses to one user-visible
//! outcome; the root cause stays in the logs.

use std::sync::Arc;

use rusqlite::Result as SqliteResult;

use crate::db::Database;
use crate::remote::TokenExchanger;

/// Outcome of a redemption attempt. Deliberately cause-free: the end user
/// only ever learns "linked" or "failed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked { handle: String },
    Failed,
}

pub struct LinkManager {
    db: Arc<Database>,
    exchanger: Arc<dyn TokenExchanger>,
    remote_api_base: String,
    client_id: String,
    public_url_base: String,
}

impl LinkManager {
    pub fn new(
        db: Arc<Database>,
        exchanger: Arc<dyn TokenExchanger>,
        remote_api_base: String,
        client_id: String,
        public_url_base: String,
    ) -> Self {
        Self {
            db,
            exchanger,
            remote_api_base,
            client_id,
            public_url_base,
        }
    }

    /// Open a linking session for a chat user and return the authorization
    /// URL they should visit.
    pub fn generate_session(&self, chat_user_id: &str) -> SqliteResult<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.db
            .save_pending_link_session(&session_id, chat_user_id)?;
        log::info!("Auth URL issued for {}", chat_user_id);
        Ok(self.auth_url(&session_id))
    }

    fn auth_url(&self, session_id: &str) -> String {
        format!(
            "{}/oauth/authorize/?client_id={}&redirect_uri={}&response_type=code&scope=basic+public_content",
            self.remote_api_base,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url(session_id))
        )
    }

    fn redirect_url(&self, session_id: &str) -> String {
        format!(
            "{}/api/v1/auth/check?sessionId={}",
            self.public_url_base, session_id
        )
    }

    /// Redeem a session with the auth code from the OAuth redirect.
    ///
    /// The session is consumed before the exchange, so a second call with
    /// the same id fails even if the first exchange errored.
    pub async fn redeem_session(&self, session_id: &str, code: &str) -> LinkOutcome {
        let session = match self.db.take_pending_link_session(session_id) {
            Ok(Some(session)) => session,
            Ok(None) => {
                log::warn!("Redemption of unknown session id {}", session_id);
                return LinkOutcome::Failed;
            }
            Err(e) => {
                log::error!("Session lookup failed for {}: {}", session_id, e);
                return LinkOutcome::Failed;
            }
        };

        let grant = match self
            .exchanger
            .exchange_code(code, &self.redirect_url(session_id))
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                log::error!(
                    "OAuth exchange failed for {}: {}",
                    session.chat_user_id,
                    e
                );
                return LinkOutcome::Failed;
            }
        };

        let account = match self
            .db
            .get_or_create_account(&grant.handle, Some(&grant.remote_id))
        {
            Ok(account) => account,
            Err(e) => {
                log::error!("Account resolution failed for {}: {}", grant.handle, e);
                return LinkOutcome::Failed;
            }
        };

        if let Err(e) = self
            .db
            .save_credential(account.id, &session.chat_user_id, &grant.access_token)
        {
            log::error!(
                "Credential store failed for {}: {}",
                session.chat_user_id,
                e
            );
            return LinkOutcome::Failed;
        }

        log::info!(
            "Linked {} to remote account {}",
            session.chat_user_id,
            grant.handle
        );
        LinkOutcome::Linked {
            handle: grant.handle,
        }
    }

    /// Delete all credentials and pending sessions for a chat user.
    /// Idempotent: a second call is a no-op.
    pub fn revoke(&self, chat_user_id: &str) -> SqliteResult<()> {
        let removed = self.db.delete_credentials_for_chat_user(chat_user_id)?;
        self.db
            .delete_pending_link_sessions_for_chat_user(chat_user_id)?;
        log::info!("Revoked {} credential(s) for {}", removed, chat_user_id);
        Ok(())
    }
}
