//! Durable entity structs shared across the bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote social-feed identity tracked by the bridge.
///
/// The remote id is stable; the handle can be renamed upstream. Accounts are
/// never hard-deleted, only soft-delisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    /// Stable remote account id. `None` until resolved via search or webhook.
    pub remote_id: Option<String>,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// When the cached profile becomes stale.
    pub profile_expires_at: DateTime<Utc>,
    /// When the account is due for its next media poll.
    pub media_check_due_at: Option<DateTime<Utc>>,
    /// Once set, no new media is ingested or posted for this account.
    pub delisted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stored remote-API access token, bound to the chat user that linked it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub account_id: i64,
    pub chat_user_id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// Ephemeral record mapping a linking session id to the requesting chat user.
#[derive(Debug, Clone)]
pub struct PendingLinkSession {
    pub session_id: String,
    pub chat_user_id: String,
    pub created_at: DateTime<Utc>,
}

/// One row per (remote post id, chat event id, chat room id) triple.
#[derive(Debug, Clone)]
pub struct DeliveredMedia {
    pub id: i64,
    pub account_id: i64,
    pub media_id: String,
    pub chat_event_id: String,
    pub room_id: String,
    pub created_at: DateTime<Utc>,
}

/// Linkage between a chat room and the account mirrored into it.
#[derive(Debug, Clone)]
pub struct BridgedRoom {
    pub room_id: String,
    pub account_id: i64,
}
