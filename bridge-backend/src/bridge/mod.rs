//! Bridge orchestration.
//!
//! Consumes inbound chat events and the sync engines' event stream, and
//! owns every chat-side side effect: admin conversations, ghost profile
//! updates, media delivery, and delist redaction.

pub mod admin_room;
pub mod events;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::try_join_all;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::chat::{ChatApi, ChatEvent};
use crate::config::Config;
use crate::db::Database;
use crate::linking::LinkManager;
use crate::remote::{RemoteApi, RemotePost};
use crate::sync::MediaSyncEngine;
use admin_room::{AdminReply, AdminRoom, Command, PendingAction};
use events::{BridgeEvent, ProfileField};

const HELP_TEXT: &str = "Commands:\n\
    !auth   - link a remote account to the bridge\n\
    !deauth - remove your stored credentials\n\
    !delist - delist your accounts and redact their bridged posts\n\
    !help   - show this message";

pub struct BridgeOrchestrator {
    db: Arc<Database>,
    chat: Arc<dyn ChatApi>,
    api: Arc<dyn RemoteApi>,
    link: Arc<LinkManager>,
    media: Arc<MediaSyncEngine>,
    config: Config,
    admin_rooms: DashMap<String, AdminRoom>,
    confirmation_seq: AtomicU64,
}

impl BridgeOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        chat: Arc<dyn ChatApi>,
        api: Arc<dyn RemoteApi>,
        link: Arc<LinkManager>,
        media: Arc<MediaSyncEngine>,
        config: Config,
    ) -> Self {
        Self {
            db,
            chat,
            api,
            link,
            media,
            config,
            admin_rooms: DashMap::new(),
            confirmation_seq: AtomicU64::new(1),
        }
    }

    /// One-shot startup reconciliation: bot identity, then a scan that
    /// classifies every joined room.
    pub async fn startup(&self) {
        self.sync_bot_identity().await;

        let rooms = match self.chat.joined_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                log::error!("Could not list joined rooms at startup: {}", e);
                return;
            }
        };
        log::info!("Startup scan over {} joined room(s)", rooms.len());
        for room_id in rooms {
            self.classify_room(&room_id).await;
        }
        log::info!(
            "Startup scan done, {} admin room(s) registered",
            self.admin_rooms.len()
        );
    }

    async fn sync_bot_identity(&self) {
        let bot = self.chat.bot_user_id().to_string();
        if let Err(e) = self
            .chat
            .set_display_name(&bot, &self.config.bot_display_name)
            .await
        {
            log::warn!("Could not set bot display name: {}", e);
        }

        let wanted = &self.config.bot_avatar_url;
        if wanted.is_empty() {
            return;
        }
        let current = self.db.get_bot_state("avatar_url").unwrap_or(None);
        if current.as_deref() == Some(wanted.as_str()) {
            return;
        }
        let uploaded = async {
            let bytes = self.api.fetch_bytes(wanted).await?;
            Ok::<_, Box<dyn std::error::Error>>(
                self.chat
                    .upload_media(bytes, "image/jpeg", "bot-avatar.jpg")
                    .await?,
            )
        }
        .await;
        match uploaded {
            Ok(content_uri) => {
                if let Err(e) = self.chat.set_avatar(&bot, &content_uri).await {
                    log::warn!("Could not set bot avatar: {}", e);
                    return;
                }
                if let Err(e) = self.db.set_bot_state("avatar_url", wanted) {
                    log::warn!("Could not persist bot avatar state: {}", e);
                }
            }
            Err(e) => log::warn!("Could not upload bot avatar: {}", e),
        }
    }

    /// Decide what a room is: bridged (leave alone), alias-mapped (relink
    /// it), empty (leave it), a 1:1 with a human (admin room), or a group
    /// room (no admin role).
    async fn classify_room(&self, room_id: &str) {
        match self.db.get_room_link(room_id) {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                log::error!("Room link lookup failed for {}: {}", room_id, e);
                return;
            }
        }

        // A room carrying one of our feed aliases is a bridged room whose
        // link record is missing, e.g. after a database wipe.
        match self.chat.canonical_alias(room_id).await {
            Ok(Some(alias)) => {
                if let Some(handle) = self.chat.handle_for_room_alias(&alias) {
                    match self.db.get_or_create_account(&handle, None) {
                        Ok(account) => {
                            if let Err(e) = self.db.link_room(room_id, account.id) {
                                log::error!("Could not relink {} to {}: {}", room_id, handle, e);
                            } else {
                                log::info!("Relinked {} to {} via {}", room_id, handle, alias);
                            }
                        }
                        Err(e) => {
                            log::error!("Account resolution failed for {}: {}", alias, e)
                        }
                    }
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Could not read alias of {}: {}", room_id, e),
        }

        let members = match self.chat.joined_members(room_id).await {
            Ok(members) => members,
            Err(e) => {
                log::warn!("Could not list members of {}: {}", room_id, e);
                return;
            }
        };
        let bot = self.chat.bot_user_id();
        let humans: Vec<&String> = members.iter().filter(|m| *m != bot).collect();

        if humans.is_empty() {
            log::info!("Leaving abandoned room {}", room_id);
            if let Err(e) = self.chat.leave_room(room_id).await {
                log::warn!("Could not leave {}: {}", room_id, e);
            }
            if let Err(e) = self.db.unlink_room(room_id) {
                log::warn!("Could not unlink {}: {}", room_id, e);
            }
            return;
        }

        if humans.len() == 1 {
            let owner = humans[0].clone();
            log::info!("Registering admin room {} for {}", room_id, owner);
            self.admin_rooms
                .insert(room_id.to_string(), AdminRoom::new(room_id.to_string(), owner));
        }
    }

    /// Homeserver alias query: a user asked to join one of our feed
    /// aliases. Creates a public room for the handle and links it, so
    /// media delivery starts fanning out there. Returns the handle so the
    /// caller can kick off an immediate profile refresh.
    pub async fn provision_alias_room(&self, alias: &str) -> Option<String> {
        let handle = self.chat.handle_for_room_alias(alias)?;
        let account = match self.db.get_or_create_account(&handle, None) {
            Ok(account) => account,
            Err(e) => {
                log::error!("Account resolution failed for alias {}: {}", alias, e);
                return None;
            }
        };
        if account.delisted {
            log::info!("Refusing to provision a room for delisted account {}", handle);
            return None;
        }

        let name = account.display_name.as_deref().unwrap_or(&handle);
        let room_id = match self.chat.create_public_room(&handle, name).await {
            Ok(room_id) => room_id,
            Err(e) => {
                log::error!("Could not create a room for {}: {}", handle, e);
                return None;
            }
        };
        if let Err(e) = self.db.link_room(&room_id, account.id) {
            log::error!("Could not link {} to {}: {}", room_id, handle, e);
            return None;
        }
        log::info!("Provisioned room {} for {}", room_id, handle);
        Some(handle)
    }

    pub async fn handle_chat_event(self: &Arc<Self>, event: ChatEvent) {
        match event {
            ChatEvent::Message {
                room_id,
                sender,
                body,
            } => {
                if sender == self.chat.bot_user_id() {
                    return;
                }
                if self.admin_rooms.contains_key(&room_id) {
                    self.handle_admin_message(&room_id, &sender, &body).await;
                }
            }
            ChatEvent::Membership {
                room_id,
                user_id,
                membership,
            } => {
                self.handle_membership(&room_id, &user_id, &membership).await;
            }
        }
    }

    async fn handle_membership(self: &Arc<Self>, room_id: &str, user_id: &str, membership: &str) {
        let bot = self.chat.bot_user_id();
        match membership {
            "invite" if user_id == bot => {
                log::info!("Invited to {}, joining", room_id);
                if let Err(e) = self.chat.join_room(room_id).await {
                    log::warn!("Could not join {}: {}", room_id, e);
                    return;
                }
                self.classify_room(room_id).await;
                if self.admin_rooms.contains_key(room_id) {
                    let _ = self.chat.send_notice(room_id, HELP_TEXT).await;
                }
            }
            "join" if user_id != bot => {
                // A third member ends the admin role for this room.
                if self.admin_rooms.contains_key(room_id) {
                    let members = self.chat.joined_members(room_id).await.unwrap_or_default();
                    if members.len() > 2 {
                        self.admin_rooms.remove(room_id);
                        let _ = self
                            .chat
                            .send_notice(
                                room_id,
                                "Another member joined, so bridge administration is disabled here.",
                            )
                            .await;
                        log::info!("Admin room {} disabled, leaving", room_id);
                        if let Err(e) = self.chat.leave_room(room_id).await {
                            log::warn!("Could not leave {}: {}", room_id, e);
                        }
                    }
                }
            }
            "leave" if user_id != bot => {
                let members = self.chat.joined_members(room_id).await.unwrap_or_default();
                let only_bot = members.iter().all(|m| m == bot);
                if only_bot {
                    self.admin_rooms.remove(room_id);
                    log::info!("Last member left {}, leaving too", room_id);
                    if let Err(e) = self.chat.leave_room(room_id).await {
                        log::warn!("Could not leave {}: {}", room_id, e);
                    }
                    if let Err(e) = self.db.unlink_room(room_id) {
                        log::warn!("Could not unlink {}: {}", room_id, e);
                    }
                }
            }
            _ => {}
        }
    }

    async fn handle_admin_message(self: &Arc<Self>, room_id: &str, sender: &str, body: &str) {
        let reply = match self.admin_rooms.get_mut(room_id) {
            Some(mut room) => room.on_message(sender, body),
            None => return,
        };

        match reply {
            AdminReply::Ignore => {}
            AdminReply::Reprompt => {
                let _ = self
                    .chat
                    .send_notice(room_id, "Please answer !yes or !no first.")
                    .await;
            }
            AdminReply::RunCommand(Command::Help) => {
                let _ = self.chat.send_notice(room_id, HELP_TEXT).await;
            }
            AdminReply::RunCommand(Command::Auth) => match self.link.generate_session(sender) {
                Ok(url) => {
                    let text = format!("Authorize the bridge here: {}", url);
                    let _ = self.chat.send_notice(room_id, &text).await;
                }
                Err(e) => {
                    log::error!("Could not open link session for {}: {}", sender, e);
                    let _ = self
                        .chat
                        .send_notice(room_id, "Something went wrong, try again later.")
                        .await;
                }
            },
            AdminReply::RunCommand(Command::Deauth) => match self.link.revoke(sender) {
                Ok(()) => {
                    let _ = self
                        .chat
                        .send_notice(room_id, "Your stored credentials have been removed.")
                        .await;
                }
                Err(e) => {
                    log::error!("Could not revoke credentials for {}: {}", sender, e);
                    let _ = self
                        .chat
                        .send_notice(room_id, "Something went wrong, try again later.")
                        .await;
                }
            },
            AdminReply::RunCommand(Command::Delist) => {
                self.begin_delist(room_id, sender).await;
            }
            AdminReply::RunCommand(Command::Yes) | AdminReply::RunCommand(Command::No) => {}
            AdminReply::ConfirmResolved { action, accepted } => {
                if accepted {
                    let PendingAction::Delist { accounts } = action;
                    self.run_delist(room_id, sender, &accounts).await;
                } else {
                    let _ = self.chat.send_notice(room_id, "Cancelled.").await;
                }
            }
        }
    }

    async fn begin_delist(self: &Arc<Self>, room_id: &str, sender: &str) {
        let accounts: Vec<(i64, String)> = match self.db.list_accounts_for_chat_user(sender) {
            Ok(accounts) => accounts
                .into_iter()
                .filter(|a| !a.delisted)
                .map(|a| (a.id, a.handle))
                .collect(),
            Err(e) => {
                log::error!("Account listing failed for {}: {}", sender, e);
                return;
            }
        };
        if accounts.is_empty() {
            let _ = self
                .chat
                .send_notice(room_id, "You have no linked accounts. Use !auth first.")
                .await;
            return;
        }

        let id = self.confirmation_seq.fetch_add(1, Ordering::SeqCst);
        let handles: Vec<&str> = accounts.iter().map(|(_, h)| h.as_str()).collect();
        {
            if let Some(mut room) = self.admin_rooms.get_mut(room_id) {
                room.begin_confirmation(id, PendingAction::Delist {
                    accounts: accounts.clone(),
                });
            } else {
                return;
            }
        }

        let text = format!(
            "This will delist {} and redact every bridged post. Reply !yes to confirm or !no to cancel.",
            handles.join(", ")
        );
        let _ = self.chat.send_notice(room_id, &text).await;

        let orchestrator = Arc::clone(self);
        let room = room_id.to_string();
        let timeout = Duration::from_secs(self.config.confirm_timeout_seconds);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            orchestrator.confirmation_timeout(&room, id).await;
        });
    }

    async fn confirmation_timeout(&self, room_id: &str, id: u64) {
        let expired = match self.admin_rooms.get_mut(room_id) {
            Some(mut room) => room.on_timeout(id),
            None => false,
        };
        if expired {
            let _ = self
                .chat
                .send_notice(room_id, "Confirmation timed out, nothing was changed.")
                .await;
        }
    }

    /// Delist marks accounts first, then redacts. Ordering matters: once
    /// the flag is set no new media can slip in while redaction runs.
    async fn run_delist(&self, room_id: &str, sender: &str, accounts: &[(i64, String)]) {
        if let Err(e) = self.link.revoke(sender) {
            log::error!("Credential revocation failed for {}: {}", sender, e);
        }

        let mut redacted = 0usize;
        let mut failed = 0usize;
        for (account_id, handle) in accounts {
            if let Err(e) = self.db.set_account_delisted(*account_id) {
                log::error!("Could not delist account {}: {}", handle, e);
                continue;
            }
            let records = match self.db.list_delivered_media_for_account(*account_id) {
                Ok(records) => records,
                Err(e) => {
                    log::error!("Could not list delivered media for {}: {}", handle, e);
                    continue;
                }
            };
            let ghost = self.chat.ghost_user_id(handle);
            for record in records {
                match self
                    .chat
                    .redact_as(&ghost, &record.room_id, &record.chat_event_id)
                    .await
                {
                    Ok(()) => redacted += 1,
                    Err(e) => {
                        failed += 1;
                        log::warn!(
                            "Redaction of {} in {} failed: {}",
                            record.chat_event_id,
                            record.room_id,
                            e
                        );
                    }
                }
            }
        }

        let text = if failed == 0 {
            format!(
                "Delisted {} account(s) and redacted {} message(s).",
                accounts.len(),
                redacted
            )
        } else {
            format!(
                "Delisted {} account(s), redacted {} message(s), {} redaction(s) failed.",
                accounts.len(),
                redacted,
                failed
            )
        };
        let _ = self.chat.send_notice(room_id, &text).await;
    }

    /// Drain the sync engines' event stream. Runs until the channel closes.
    pub async fn run_event_loop(self: Arc<Self>, mut rx: UnboundedReceiver<BridgeEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                BridgeEvent::ProfileChanged {
                    account_id,
                    handle,
                    change,
                } => self.apply_profile_change(account_id, &handle, change).await,
                BridgeEvent::NewMedia {
                    account_id,
                    handle,
                    post,
                } => self.deliver_post(account_id, &handle, post).await,
            }
        }
        log::info!("Event loop stopped");
    }

    async fn apply_profile_change(&self, account_id: i64, handle: &str, change: ProfileField) {
        let ghost = self.chat.ghost_user_id(handle);
        let rooms = self.db.list_rooms_for_account(account_id).unwrap_or_default();

        match change {
            ProfileField::DisplayName(name) => {
                log::info!("Display name of {} is now {:?}", handle, name);
                if let Err(e) = self.chat.set_display_name(&ghost, &name).await {
                    log::warn!("Could not update ghost name for {}: {}", handle, e);
                }
                for room in rooms {
                    if let Err(e) = self.chat.set_room_name(&room, &name).await {
                        log::warn!("Could not rename room {}: {}", room, e);
                    }
                }
            }
            ProfileField::Avatar(url) => {
                log::info!("Avatar of {} changed", handle);
                let bytes = match self.api.fetch_bytes(&url).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!("Could not fetch avatar for {}: {}", handle, e);
                        return;
                    }
                };
                let content_uri = match self
                    .chat
                    .upload_media(bytes, "image/jpeg", &format!("{}-avatar.jpg", handle))
                    .await
                {
                    Ok(uri) => uri,
                    Err(e) => {
                        log::warn!("Could not upload avatar for {}: {}", handle, e);
                        return;
                    }
                };
                if let Err(e) = self.chat.set_avatar(&ghost, &content_uri).await {
                    log::warn!("Could not update ghost avatar for {}: {}", handle, e);
                }
                for room in rooms {
                    if let Err(e) = self.chat.set_room_avatar(&room, &content_uri).await {
                        log::warn!("Could not update avatar of room {}: {}", room, e);
                    }
                }
            }
        }
    }

    /// Deliver one accepted post: upload every item once, then send into
    /// each bridged room in item order, caption last. Partial delivery is
    /// confirmed as-is; total failure releases the post for a later retry.
    async fn deliver_post(&self, account_id: i64, handle: &str, post: RemotePost) {
        let rooms = self.db.list_rooms_for_account(account_id).unwrap_or_default();
        if rooms.is_empty() {
            log::info!("No bridged rooms for {}, holding post {}", handle, post.id);
            self.media.release(&post.id);
            return;
        }

        let post_id = post.id.as_str();
        let uploads = try_join_all(post.items.iter().enumerate().map(|(i, item)| {
            let filename = format!("{}-{}.{}", handle, i, item.kind.file_extension());
            async move {
                let bytes = self.api.fetch_bytes(&item.url).await.map_err(|e| {
                    log::warn!("Download failed for item {} of {}: {}", i, post_id, e);
                })?;
                let uri = self
                    .chat
                    .upload_media(bytes, item.kind.mime(), &filename)
                    .await
                    .map_err(|e| {
                        log::warn!("Upload failed for item {} of {}: {}", i, post_id, e);
                    })?;
                Ok::<_, ()>((item, uri, filename))
            }
        }))
        .await;

        let uploads = match uploads {
            Ok(uploads) => uploads,
            Err(()) => {
                self.media.release(&post.id);
                return;
            }
        };

        let ghost = self.chat.ghost_user_id(handle);
        let mut deliveries: Vec<(String, String)> = Vec::new();
        for room in &rooms {
            for (item, uri, filename) in &uploads {
                match self
                    .chat
                    .send_media_as(&ghost, room, item, uri, filename)
                    .await
                {
                    Ok(event_id) => deliveries.push((event_id, room.clone())),
                    Err(e) => {
                        log::warn!("Send failed for {} in {}: {}", post.id, room, e);
                    }
                }
            }
            if let Some(caption) = &post.caption {
                match self.chat.send_text_as(&ghost, room, caption).await {
                    Ok(event_id) => deliveries.push((event_id, room.clone())),
                    Err(e) => log::warn!("Caption send failed in {}: {}", room, e),
                }
            }
        }

        if deliveries.is_empty() {
            self.media.release(&post.id);
            return;
        }
        if let Err(e) = self
            .media
            .confirm_delivery(account_id, &post.id, &deliveries)
        {
            log::error!("Could not record delivery of {}: {}", post.id, e);
        }
        log::info!(
            "Delivered post {} from {} to {} room(s)",
            post.id,
            handle,
            rooms.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatError;
    use crate::remote::{ApiError, MediaItem, MediaKind, RemoteProfile, TokenGrant};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MockChat {
        members: Mutex<HashMap<String, Vec<String>>>,
        rooms: Mutex<Vec<String>>,
        aliases: Mutex<HashMap<String, String>>,
        created_rooms: Mutex<Vec<String>>,
        notices: Mutex<Vec<(String, String)>>,
        redactions: Mutex<Vec<(String, String, String)>>,
        media_sends: Mutex<Vec<(String, String)>>,
        text_sends: Mutex<Vec<(String, String)>>,
        left: Mutex<Vec<String>>,
        event_seq: Mutex<u64>,
    }

    impl MockChat {
        fn next_event_id(&self) -> String {
            let mut seq = self.event_seq.lock().unwrap();
            *seq += 1;
            format!("$ev{}", seq)
        }
    }

    #[async_trait::async_trait]
    impl ChatApi for MockChat {
        fn bot_user_id(&self) -> &str {
            "@_feed:example.org"
        }

        fn ghost_user_id(&self, handle: &str) -> String {
            format!("@_feed_{}:example.org", handle)
        }

        fn room_alias_for_handle(&self, handle: &str) -> String {
            format!("#_feed_{}:example.org", handle)
        }

        fn handle_for_room_alias(&self, alias: &str) -> Option<String> {
            alias
                .strip_prefix("#_feed_")?
                .strip_suffix(":example.org")
                .map(|h| h.to_string())
        }

        async fn create_public_room(
            &self,
            handle: &str,
            _name: &str,
        ) -> Result<String, ChatError> {
            let room_id = format!("!feed_{}:example.org", handle);
            self.created_rooms.lock().unwrap().push(room_id.clone());
            Ok(room_id)
        }

        async fn canonical_alias(&self, room_id: &str) -> Result<Option<String>, ChatError> {
            Ok(self.aliases.lock().unwrap().get(room_id).cloned())
        }

        async fn send_notice(&self, room_id: &str, text: &str) -> Result<String, ChatError> {
            self.notices
                .lock()
                .unwrap()
                .push((room_id.to_string(), text.to_string()));
            Ok(self.next_event_id())
        }

        async fn send_text_as(
            &self,
            _ghost: &str,
            room_id: &str,
            text: &str,
        ) -> Result<String, ChatError> {
            self.text_sends
                .lock()
                .unwrap()
                .push((room_id.to_string(), text.to_string()));
            Ok(self.next_event_id())
        }

        async fn send_media_as(
            &self,
            _ghost: &str,
            room_id: &str,
            _item: &MediaItem,
            content_uri: &str,
            _filename: &str,
        ) -> Result<String, ChatError> {
            self.media_sends
                .lock()
                .unwrap()
                .push((room_id.to_string(), content_uri.to_string()));
            Ok(self.next_event_id())
        }

        async fn upload_media(
            &self,
            _bytes: Vec<u8>,
            _mime: &str,
            filename: &str,
        ) -> Result<String, ChatError> {
            Ok(format!("mxc://example.org/{}", filename))
        }

        async fn redact_as(
            &self,
            ghost: &str,
            room_id: &str,
            event_id: &str,
        ) -> Result<(), ChatError> {
            self.redactions.lock().unwrap().push((
                ghost.to_string(),
                room_id.to_string(),
                event_id.to_string(),
            ));
            Ok(())
        }

        async fn set_display_name(&self, _user_id: &str, _name: &str) -> Result<(), ChatError> {
            Ok(())
        }
        async fn set_avatar(&self, _user_id: &str, _uri: &str) -> Result<(), ChatError> {
            Ok(())
        }
        async fn set_room_name(&self, _room_id: &str, _name: &str) -> Result<(), ChatError> {
            Ok(())
        }
        async fn set_room_avatar(&self, _room_id: &str, _uri: &str) -> Result<(), ChatError> {
            Ok(())
        }

        async fn joined_rooms(&self) -> Result<Vec<String>, ChatError> {
            Ok(self.rooms.lock().unwrap().clone())
        }

        async fn joined_members(&self, room_id: &str) -> Result<Vec<String>, ChatError> {
            Ok(self
                .members
                .lock()
                .unwrap()
                .get(room_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn join_room(&self, _room_id: &str) -> Result<(), ChatError> {
            Ok(())
        }

        async fn leave_room(&self, room_id: &str) -> Result<(), ChatError> {
            self.left.lock().unwrap().push(room_id.to_string());
            Ok(())
        }
    }

    struct NeverExchanger;

    #[async_trait::async_trait]
    impl crate::remote::TokenExchanger for NeverExchanger {
        async fn exchange_code(&self, _: &str, _: &str) -> Result<TokenGrant, ApiError> {
            Err(ApiError::NoCredentials)
        }
    }

    struct FakeRemote;

    #[async_trait::async_trait]
    impl RemoteApi for FakeRemote {
        async fn search_users(&self, _handle: &str) -> Result<Vec<RemoteProfile>, ApiError> {
            Ok(Vec::new())
        }
        async fn profile(&self, _remote_id: &str) -> Result<RemoteProfile, ApiError> {
            Err(ApiError::NoCredentials)
        }
        async fn recent_media(
            &self,
            _remote_id: &str,
            _count: u32,
        ) -> Result<Vec<RemotePost>, ApiError> {
            Ok(Vec::new())
        }
        async fn media(&self, _media_id: &str) -> Result<RemotePost, ApiError> {
            Err(ApiError::NoCredentials)
        }
        async fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>, ApiError> {
            Ok(vec![0u8; 4])
        }
        async fn list_subscription_callbacks(&self) -> Result<Vec<String>, ApiError> {
            Ok(Vec::new())
        }
        async fn create_subscription(
            &self,
            _callback_url: &str,
            _verify_token: &str,
        ) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            database_url: String::new(),
            public_url_base: "https://bridge.example.org".to_string(),
            remote_api_base: "http://unused".to_string(),
            remote_client_id: "id".to_string(),
            remote_client_secret: "secret".to_string(),
            api_max_attempts: 5,
            homeserver_url: String::new(),
            homeserver_domain: "example.org".to_string(),
            as_token: String::new(),
            hs_token: String::new(),
            bot_localpart: "_feed".to_string(),
            bot_display_name: "Feed Bridge".to_string(),
            bot_avatar_url: String::new(),
            media_check_hours: 1.5,
            media_poll_seconds: 60,
            profile_tick_minutes: 30,
            profile_cache_hours: 1.0,
            profile_updates_per_tick: 500,
            confirm_timeout_seconds: 60,
        }
    }

    fn build(
        db: Arc<Database>,
        chat: Arc<MockChat>,
    ) -> (Arc<BridgeOrchestrator>, Arc<MediaSyncEngine>) {
        let api: Arc<dyn RemoteApi> = Arc::new(FakeRemote);
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = Arc::new(LinkManager::new(
            db.clone(),
            Arc::new(NeverExchanger),
            "http://unused".to_string(),
            "id".to_string(),
            "https://bridge.example.org".to_string(),
        ));
        let media =
            Arc::new(MediaSyncEngine::new(db.clone(), api.clone(), tx, 1.5).unwrap());
        let orchestrator = Arc::new(BridgeOrchestrator::new(
            db,
            chat,
            api,
            link,
            media.clone(),
            test_config(),
        ));
        (orchestrator, media)
    }

    #[tokio::test]
    async fn startup_classifies_rooms() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let account = db.get_or_create_account("alice_feed", Some("123")).unwrap();
        db.link_room("!bridged:example.org", account.id).unwrap();

        let chat = Arc::new(MockChat::default());
        *chat.rooms.lock().unwrap() = vec![
            "!bridged:example.org".to_string(),
            "!admin:example.org".to_string(),
            "!empty:example.org".to_string(),
            "!group:example.org".to_string(),
        ];
        chat.members.lock().unwrap().extend([
            (
                "!admin:example.org".to_string(),
                vec![
                    "@_feed:example.org".to_string(),
                    "@alice:example.org".to_string(),
                ],
            ),
            (
                "!empty:example.org".to_string(),
                vec!["@_feed:example.org".to_string()],
            ),
            (
                "!group:example.org".to_string(),
                vec![
                    "@_feed:example.org".to_string(),
                    "@a:example.org".to_string(),
                    "@b:example.org".to_string(),
                ],
            ),
        ]);

        let (orchestrator, _) = build(db, chat.clone());
        orchestrator.startup().await;

        assert!(orchestrator.admin_rooms.contains_key("!admin:example.org"));
        assert!(!orchestrator.admin_rooms.contains_key("!group:example.org"));
        assert_eq!(*chat.left.lock().unwrap(), vec!["!empty:example.org"]);
    }

    #[tokio::test]
    async fn alias_query_provisions_and_links_room() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let chat = Arc::new(MockChat::default());
        let (orchestrator, _) = build(db.clone(), chat.clone());

        let handle = orchestrator
            .provision_alias_room("#_feed_alice_feed:example.org")
            .await
            .unwrap();
        assert_eq!(handle, "alice_feed");

        let account = db.get_account_by_handle("alice_feed").unwrap().unwrap();
        let rooms = db.list_rooms_for_account(account.id).unwrap();
        assert_eq!(rooms, vec!["!feed_alice_feed:example.org".to_string()]);
        assert_eq!(
            *chat.created_rooms.lock().unwrap(),
            vec!["!feed_alice_feed:example.org"]
        );
    }

    #[tokio::test]
    async fn foreign_alias_is_not_provisioned() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let chat = Arc::new(MockChat::default());
        let (orchestrator, _) = build(db, chat.clone());

        assert!(orchestrator
            .provision_alias_room("#general:example.org")
            .await
            .is_none());
        assert!(chat.created_rooms.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delisted_account_alias_is_refused() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let account = db.get_or_create_account("alice_feed", Some("123")).unwrap();
        db.set_account_delisted(account.id).unwrap();
        let chat = Arc::new(MockChat::default());
        let (orchestrator, _) = build(db, chat.clone());

        assert!(orchestrator
            .provision_alias_room("#_feed_alice_feed:example.org")
            .await
            .is_none());
        assert!(chat.created_rooms.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provisioned_room_receives_new_media() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let chat = Arc::new(MockChat::default());
        let (orchestrator, media) = build(db.clone(), chat.clone());

        orchestrator
            .provision_alias_room("#_feed_alice_feed:example.org")
            .await
            .unwrap();
        let account = db.get_account_by_handle("alice_feed").unwrap().unwrap();

        let post = RemotePost {
            id: "p-1".to_string(),
            owner_remote_id: "123".to_string(),
            owner_handle: "alice_feed".to_string(),
            caption: Some("first post".to_string()),
            items: vec![MediaItem {
                kind: MediaKind::Image,
                url: "http://cdn/p.jpg".to_string(),
                width: 640,
                height: 480,
            }],
        };
        assert!(media.ingest_post(&account, &post));
        orchestrator
            .deliver_post(account.id, "alice_feed", post.clone())
            .await;

        let media_sends = chat.media_sends.lock().unwrap();
        assert_eq!(media_sends.len(), 1);
        assert_eq!(media_sends[0].0, "!feed_alice_feed:example.org");
        let text_sends = chat.text_sends.lock().unwrap();
        assert_eq!(
            *text_sends,
            vec![(
                "!feed_alice_feed:example.org".to_string(),
                "first post".to_string()
            )]
        );
        // Confirmed: the dedup record holds and the watermark advanced.
        assert_eq!(db.list_delivered_media_for_account(account.id).unwrap().len(), 2);
        let account = db.get_account(account.id).unwrap().unwrap();
        assert!(account.media_check_due_at.is_some());
        assert!(!media.ingest_post(&account, &post));
    }

    #[tokio::test]
    async fn startup_relinks_alias_room() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let chat = Arc::new(MockChat::default());
        *chat.rooms.lock().unwrap() = vec!["!orphan:example.org".to_string()];
        chat.aliases.lock().unwrap().insert(
            "!orphan:example.org".to_string(),
            "#_feed_alice_feed:example.org".to_string(),
        );

        let (orchestrator, _) = build(db.clone(), chat.clone());
        orchestrator.startup().await;

        let account = db.get_account_by_handle("alice_feed").unwrap().unwrap();
        assert_eq!(
            db.get_room_link("!orphan:example.org")
                .unwrap()
                .unwrap()
                .account_id,
            account.id
        );
        assert!(!orchestrator.admin_rooms.contains_key("!orphan:example.org"));
        assert!(chat.left.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auth_command_sends_link() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let chat = Arc::new(MockChat::default());
        let (orchestrator, _) = build(db, chat.clone());
        orchestrator.admin_rooms.insert(
            "!a:example.org".to_string(),
            AdminRoom::new("!a:example.org".to_string(), "@alice:example.org".to_string()),
        );

        orchestrator
            .handle_chat_event(ChatEvent::Message {
                room_id: "!a:example.org".to_string(),
                sender: "@alice:example.org".to_string(),
                body: "!auth".to_string(),
            })
            .await;

        let notices = chat.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].1.contains("/oauth/authorize/"));
        assert!(notices[0].1.contains("sessionId"));
    }

    #[tokio::test]
    async fn delist_without_accounts_points_at_auth() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let chat = Arc::new(MockChat::default());
        let (orchestrator, _) = build(db, chat.clone());
        orchestrator.admin_rooms.insert(
            "!a:example.org".to_string(),
            AdminRoom::new("!a:example.org".to_string(), "@alice:example.org".to_string()),
        );

        orchestrator
            .handle_chat_event(ChatEvent::Message {
                room_id: "!a:example.org".to_string(),
                sender: "@alice:example.org".to_string(),
                body: "!delist".to_string(),
            })
            .await;

        let notices = chat.notices.lock().unwrap();
        assert!(notices[0].1.contains("!auth"));
    }

    #[tokio::test]
    async fn confirmed_delist_redacts_and_flags() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let account = db.get_or_create_account("alice_feed", Some("123")).unwrap();
        db.save_credential(account.id, "@alice:example.org", "tok")
            .unwrap();
        db.record_delivered_media(account.id, "p-1", "$ev1", "!r:example.org")
            .unwrap();
        db.record_delivered_media(account.id, "p-1", "$ev2", "!r:example.org")
            .unwrap();

        let chat = Arc::new(MockChat::default());
        let (orchestrator, _) = build(db.clone(), chat.clone());
        orchestrator.admin_rooms.insert(
            "!a:example.org".to_string(),
            AdminRoom::new("!a:example.org".to_string(), "@alice:example.org".to_string()),
        );

        for body in ["!delist", "!yes"] {
            orchestrator
                .handle_chat_event(ChatEvent::Message {
                    room_id: "!a:example.org".to_string(),
                    sender: "@alice:example.org".to_string(),
                    body: body.to_string(),
                })
                .await;
        }

        assert!(db.get_account(account.id).unwrap().unwrap().delisted);
        assert!(db
            .list_credentials_for_chat_user("@alice:example.org")
            .unwrap()
            .is_empty());
        let redactions = chat.redactions.lock().unwrap();
        assert_eq!(redactions.len(), 2);
        assert_eq!(redactions[0].0, "@_feed_alice_feed:example.org");
    }

    #[tokio::test]
    async fn declined_delist_changes_nothing() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let account = db.get_or_create_account("alice_feed", Some("123")).unwrap();
        db.save_credential(account.id, "@alice:example.org", "tok")
            .unwrap();

        let chat = Arc::new(MockChat::default());
        let (orchestrator, _) = build(db.clone(), chat.clone());
        orchestrator.admin_rooms.insert(
            "!a:example.org".to_string(),
            AdminRoom::new("!a:example.org".to_string(), "@alice:example.org".to_string()),
        );

        for body in ["!delist", "!no"] {
            orchestrator
                .handle_chat_event(ChatEvent::Message {
                    room_id: "!a:example.org".to_string(),
                    sender: "@alice:example.org".to_string(),
                    body: body.to_string(),
                })
                .await;
        }

        assert!(!db.get_account(account.id).unwrap().unwrap().delisted);
        assert!(!db
            .list_credentials_for_chat_user("@alice:example.org")
            .unwrap()
            .is_empty());
        assert!(chat.redactions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn third_member_disables_admin_room() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let chat = Arc::new(MockChat::default());
        chat.members.lock().unwrap().insert(
            "!a:example.org".to_string(),
            vec![
                "@_feed:example.org".to_string(),
                "@alice:example.org".to_string(),
                "@bob:example.org".to_string(),
            ],
        );
        let (orchestrator, _) = build(db, chat.clone());
        orchestrator.admin_rooms.insert(
            "!a:example.org".to_string(),
            AdminRoom::new("!a:example.org".to_string(), "@alice:example.org".to_string()),
        );

        orchestrator
            .handle_chat_event(ChatEvent::Membership {
                room_id: "!a:example.org".to_string(),
                user_id: "@bob:example.org".to_string(),
                membership: "join".to_string(),
            })
            .await;

        assert!(!orchestrator.admin_rooms.contains_key("!a:example.org"));
        assert_eq!(*chat.left.lock().unwrap(), vec!["!a:example.org"]);
    }

    #[tokio::test]
    async fn post_without_rooms_is_released_for_retry() {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let account = db.get_or_create_account("alice_feed", Some("123")).unwrap();
        let chat = Arc::new(MockChat::default());
        let (orchestrator, media) = build(db, chat);

        let post = RemotePost {
            id: "p-1".to_string(),
            owner_remote_id: "123".to_string(),
            owner_handle: "alice_feed".to_string(),
            caption: None,
            items: vec![MediaItem {
                kind: MediaKind::Image,
                url: "http://cdn/p.jpg".to_string(),
                width: 1,
                height: 1,
            }],
        };
        assert!(media.ingest_post(&account, &post));
        orchestrator
            .deliver_post(account.id, "alice_feed", post.clone())
            .await;

        // Released, so the next sweep can pick it up again.
        assert!(media.ingest_post(&account, &post));
    }
}
