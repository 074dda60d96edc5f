//! Thin client-server transport for the chat protocol.
//!
//! Application-service style: the bot token authenticates every call and a
//! `user_id` query parameter impersonates ghost identities.

use serde_json::{json, Value};

use super::{ChatApi, ChatError};
use crate::remote::{MediaItem, MediaKind};

pub struct MatrixChat {
    http: reqwest::Client,
    base_url: String,
    as_token: String,
    domain: String,
    bot_user_id: String,
    ghost_prefix: String,
}

impl MatrixChat {
    pub fn new(base_url: String, as_token: String, domain: String, bot_localpart: String) -> Self {
        let bot_user_id = format!("@{}:{}", bot_localpart, domain);
        Self {
            http: reqwest::Client::new(),
            base_url,
            as_token,
            domain,
            bot_user_id,
            ghost_prefix: "_feed_".to_string(),
        }
    }

    fn txn_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    async fn put_json(
        &self,
        path: &str,
        as_user: Option<&str>,
        body: Value,
    ) -> Result<Value, ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .put(&url)
            .bearer_auth(&self.as_token)
            .json(&body);
        if let Some(user) = as_user {
            request = request.query(&[("user_id", user)]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChatError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn post_json(
        &self,
        path: &str,
        as_user: Option<&str>,
        body: Value,
    ) -> Result<Value, ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&self.as_token)
            .json(&body);
        if let Some(user) = as_user {
            request = request.query(&[("user_id", user)]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChatError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.as_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChatError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn send_event(
        &self,
        as_user: Option<&str>,
        room_id: &str,
        content: Value,
    ) -> Result<String, ChatError> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/send/m.room.message/{}",
            urlencoding::encode(room_id),
            Self::txn_id()
        );
        let response = self.put_json(&path, as_user, content).await?;
        Ok(response
            .get("event_id")
            .and_then(|e| e.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait::async_trait]
impl ChatApi for MatrixChat {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    fn ghost_user_id(&self, handle: &str) -> String {
        format!("@{}{}:{}", self.ghost_prefix, handle, self.domain)
    }

    fn room_alias_for_handle(&self, handle: &str) -> String {
        format!("#{}{}:{}", self.ghost_prefix, handle, self.domain)
    }

    fn handle_for_room_alias(&self, alias: &str) -> Option<String> {
        let (localpart, domain) = alias.strip_prefix('#')?.split_once(':')?;
        if domain != self.domain {
            return None;
        }
        localpart
            .strip_prefix(self.ghost_prefix.as_str())
            .filter(|h| !h.is_empty())
            .map(|h| h.to_string())
    }

    async fn create_public_room(&self, handle: &str, name: &str) -> Result<String, ChatError> {
        let body = self
            .post_json(
                "/_matrix/client/v3/createRoom",
                None,
                json!({
                    "room_alias_name": format!("{}{}", self.ghost_prefix, handle),
                    "name": name,
                    "visibility": "public",
                    "preset": "public_chat",
                }),
            )
            .await?;
        Ok(body
            .get("room_id")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn canonical_alias(&self, room_id: &str) -> Result<Option<String>, ChatError> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/state/m.room.canonical_alias",
            urlencoding::encode(room_id)
        );
        match self.get_json(&path).await {
            Ok(body) => Ok(body
                .get("alias")
                .and_then(|a| a.as_str())
                .map(|a| a.to_string())),
            // Rooms without the state event report 404.
            Err(ChatError::Remote { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send_notice(&self, room_id: &str, text: &str) -> Result<String, ChatError> {
        self.send_event(
            None,
            room_id,
            json!({ "msgtype": "m.notice", "body": text }),
        )
        .await
    }

    async fn send_text_as(
        &self,
        ghost: &str,
        room_id: &str,
        text: &str,
    ) -> Result<String, ChatError> {
        self.send_event(
            Some(ghost),
            room_id,
            json!({ "msgtype": "m.text", "body": text }),
        )
        .await
    }

    async fn send_media_as(
        &self,
        ghost: &str,
        room_id: &str,
        item: &MediaItem,
        content_uri: &str,
        filename: &str,
    ) -> Result<String, ChatError> {
        let msgtype = match item.kind {
            MediaKind::Image => "m.image",
            MediaKind::Video => "m.video",
        };
        self.send_event(
            Some(ghost),
            room_id,
            json!({
                "msgtype": msgtype,
                "body": filename,
                "url": content_uri,
                "info": {
                    "mimetype": item.kind.mime(),
                    "w": item.width,
                    "h": item.height,
                }
            }),
        )
        .await
    }

    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        filename: &str,
    ) -> Result<String, ChatError> {
        let url = format!("{}/_matrix/media/v3/upload", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.as_token)
            .query(&[("filename", filename)])
            .header("Content-Type", mime)
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChatError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        let body: Value = response.json().await?;
        Ok(body
            .get("content_uri")
            .and_then(|u| u.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn redact_as(
        &self,
        ghost: &str,
        room_id: &str,
        event_id: &str,
    ) -> Result<(), ChatError> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/redact/{}/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(event_id),
            Self::txn_id()
        );
        self.put_json(&path, Some(ghost), json!({ "reason": "content delisted" }))
            .await?;
        Ok(())
    }

    async fn set_display_name(&self, user_id: &str, name: &str) -> Result<(), ChatError> {
        let path = format!(
            "/_matrix/client/v3/profile/{}/displayname",
            urlencoding::encode(user_id)
        );
        self.put_json(&path, Some(user_id), json!({ "displayname": name }))
            .await?;
        Ok(())
    }

    async fn set_avatar(&self, user_id: &str, content_uri: &str) -> Result<(), ChatError> {
        let path = format!(
            "/_matrix/client/v3/profile/{}/avatar_url",
            urlencoding::encode(user_id)
        );
        self.put_json(&path, Some(user_id), json!({ "avatar_url": content_uri }))
            .await?;
        Ok(())
    }

    async fn set_room_name(&self, room_id: &str, name: &str) -> Result<(), ChatError> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/state/m.room.name",
            urlencoding::encode(room_id)
        );
        self.put_json(&path, None, json!({ "name": name })).await?;
        Ok(())
    }

    async fn set_room_avatar(&self, room_id: &str, content_uri: &str) -> Result<(), ChatError> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/state/m.room.avatar",
            urlencoding::encode(room_id)
        );
        self.put_json(&path, None, json!({ "url": content_uri }))
            .await?;
        Ok(())
    }

    async fn joined_rooms(&self) -> Result<Vec<String>, ChatError> {
        let body = self.get_json("/_matrix/client/v3/joined_rooms").await?;
        Ok(body
            .get("joined_rooms")
            .and_then(|r| r.as_array())
            .map(|rooms| {
                rooms
                    .iter()
                    .filter_map(|r| r.as_str())
                    .map(|r| r.to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn joined_members(&self, room_id: &str) -> Result<Vec<String>, ChatError> {
        let body = self
            .get_json(&format!(
                "/_matrix/client/v3/rooms/{}/joined_members",
                urlencoding::encode(room_id)
            ))
            .await?;
        Ok(body
            .get("joined")
            .and_then(|j| j.as_object())
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn join_room(&self, room_id: &str) -> Result<(), ChatError> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/join",
            urlencoding::encode(room_id)
        );
        self.post_json(&path, None, json!({})).await?;
        Ok(())
    }

    async fn leave_room(&self, room_id: &str) -> Result<(), ChatError> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/leave",
            urlencoding::encode(room_id)
        );
        self.post_json(&path, None, json!({})).await?;
        Ok(())
    }
}
