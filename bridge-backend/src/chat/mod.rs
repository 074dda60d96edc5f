//! Chat-protocol collaborator seam.
//!
//! The bridge core only talks to the trait; the transport lives in
//! `matrix.rs`. Tests substitute a recording mock.

pub mod matrix;

use std::fmt;

use crate::remote::MediaItem;

#[derive(Debug)]
pub enum ChatError {
    Http(reqwest::Error),
    Remote { status: u16, message: String },
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "chat http error: {}", e),
            Self::Remote { status, message } => {
                write!(f, "chat API error (status {}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for ChatError {}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

/// Inbound chat events, already reduced to what the bridge cares about.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message {
        room_id: String,
        sender: String,
        body: String,
    },
    Membership {
        room_id: String,
        /// The user whose membership changed.
        user_id: String,
        membership: String,
    },
}

/// Everything the bridge needs from the chat protocol.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// The bridge bot's own user id.
    fn bot_user_id(&self) -> &str;

    /// Virtual chat identity for a remote handle.
    fn ghost_user_id(&self, handle: &str) -> String;

    /// Public room alias advertising a remote handle's feed.
    fn room_alias_for_handle(&self, handle: &str) -> String;

    /// Inverse of `room_alias_for_handle`. None for aliases the bridge
    /// does not own.
    fn handle_for_room_alias(&self, alias: &str) -> Option<String>;

    /// Create a public room carrying the feed alias for a handle.
    /// Returns the new room id.
    async fn create_public_room(&self, handle: &str, name: &str) -> Result<String, ChatError>;

    /// The room's canonical alias, when it has one.
    async fn canonical_alias(&self, room_id: &str) -> Result<Option<String>, ChatError>;

    /// Send a plain-language notice as the bot. Returns the event id.
    async fn send_notice(&self, room_id: &str, text: &str) -> Result<String, ChatError>;

    /// Send a text message attributed to a ghost identity.
    async fn send_text_as(
        &self,
        ghost: &str,
        room_id: &str,
        text: &str,
    ) -> Result<String, ChatError>;

    /// Send a media message attributed to a ghost identity.
    async fn send_media_as(
        &self,
        ghost: &str,
        room_id: &str,
        item: &MediaItem,
        content_uri: &str,
        filename: &str,
    ) -> Result<String, ChatError>;

    /// Upload bytes to the chat media store; returns a durable content URI.
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        filename: &str,
    ) -> Result<String, ChatError>;

    /// Redact a previously sent event, attributed to a ghost identity.
    async fn redact_as(&self, ghost: &str, room_id: &str, event_id: &str)
        -> Result<(), ChatError>;

    async fn set_display_name(&self, user_id: &str, name: &str) -> Result<(), ChatError>;
    async fn set_avatar(&self, user_id: &str, content_uri: &str) -> Result<(), ChatError>;
    async fn set_room_name(&self, room_id: &str, name: &str) -> Result<(), ChatError>;
    async fn set_room_avatar(&self, room_id: &str, content_uri: &str) -> Result<(), ChatError>;

    async fn joined_rooms(&self) -> Result<Vec<String>, ChatError>;
    async fn joined_members(&self, room_id: &str) -> Result<Vec<String>, ChatError>;
    async fn join_room(&self, room_id: &str) -> Result<(), ChatError>;
    async fn leave_room(&self, room_id: &str) -> Result<(), ChatError>;
}
