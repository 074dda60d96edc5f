//! Media ingestion: webhook pushes plus a polling sweep.
//!
//! Both paths converge on `ingest_post`, which holds the dedup gate: a
//! single `INSERT OR IGNORE` claim on the post id, so check and record
//! are one write and a concurrent push and poll cannot both win. The poll
//! watermark only advances once a post has actually been delivered, so a
//! failed delivery is released and retried on the next sweep.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::Result as SqliteResult;
use tokio::sync::mpsc::UnboundedSender;

use crate::bridge::events::BridgeEvent;
use crate::db::Database;
use crate::models::Account;
use crate::remote::{ApiError, RemoteApi, RemotePost};

pub struct MediaSyncEngine {
    db: Arc<Database>,
    api: Arc<dyn RemoteApi>,
    events: UnboundedSender<BridgeEvent>,
    polling: AtomicBool,
    media_check_hours: f64,
    /// Secret path segment of the webhook endpoint. Persisted so the
    /// subscription survives restarts.
    install_token: String,
    /// One-time tokens handed to pending subscription requests, consumed
    /// by the challenge GET.
    pending_verify_tokens: Mutex<Vec<String>>,
}

impl MediaSyncEngine {
    pub fn new(
        db: Arc<Database>,
        api: Arc<dyn RemoteApi>,
        events: UnboundedSender<BridgeEvent>,
        media_check_hours: f64,
    ) -> SqliteResult<Self> {
        let install_token =
            db.get_or_init_bot_state("push_token", || uuid::Uuid::new_v4().to_string())?;
        Ok(Self {
            db,
            api,
            events,
            polling: AtomicBool::new(false),
            media_check_hours,
            install_token,
            pending_verify_tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn install_token(&self) -> &str {
        &self.install_token
    }

    /// Ensure the remote media subscription points at our webhook. Run once
    /// at startup; failure is logged by the caller and polling covers the gap.
    pub async fn prepare(&self, public_url_base: &str) -> Result<(), ApiError> {
        let callback_url = format!(
            "{}/api/v1/media/push/{}",
            public_url_base, self.install_token
        );
        let callbacks = self.api.list_subscription_callbacks().await?;
        if callbacks.iter().any(|c| c == &callback_url) {
            log::info!("Media subscription already installed");
            return Ok(());
        }

        let verify_token = uuid::Uuid::new_v4().to_string();
        self.pending_verify_tokens
            .lock()
            .unwrap()
            .push(verify_token.clone());
        self.api
            .create_subscription(&callback_url, &verify_token)
            .await?;
        log::info!("Media subscription requested at {}", callback_url);
        Ok(())
    }

    /// At-most-once verify-token check for the subscription challenge.
    pub fn consume_verify_token(&self, token: &str) -> bool {
        let mut pending = self.pending_verify_tokens.lock().unwrap();
        match pending.iter().position(|t| t == token) {
            Some(i) => {
                pending.remove(i);
                true
            }
            None => false,
        }
    }

    pub async fn start(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        log::info!("Media poll started (every {:?})", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.poll_tick().await,
                _ = &mut shutdown => {
                    log::info!("Media poll stopped");
                    return;
                }
            }
        }
    }

    /// One sweep over every account needing a check, strictly sequential,
    /// oldest watermark first.
    pub async fn poll_tick(&self) {
        if self.polling.swap(true, Ordering::SeqCst) {
            log::warn!("Media sweep still running, skipping this one");
            return;
        }

        match self.accounts_needing_check() {
            Ok(due) => {
                for account in due {
                    if let Err(e) = self.check_account(&account).await {
                        log::warn!("Media check failed for {}: {}", account.handle, e);
                    }
                }
            }
            Err(e) => log::error!("Could not list accounts due for media check: {}", e),
        }

        self.polling.store(false, Ordering::SeqCst);
    }

    /// Union of watermark-due accounts and every credentialed account.
    /// Credential holders are always checked so their feed stays live even
    /// while their watermark sits in the future.
    fn accounts_needing_check(&self) -> SqliteResult<Vec<Account>> {
        let mut due = self.db.list_accounts_due_media_check(Utc::now())?;
        let mut seen: HashSet<i64> = due.iter().map(|a| a.id).collect();
        for id in self.db.list_credentialed_account_ids()? {
            if !seen.insert(id) {
                continue;
            }
            if let Some(account) = self.db.get_account(id)? {
                if !account.delisted {
                    due.push(account);
                }
            }
        }
        // None sorts first, matching the SQL ordering of the due list.
        due.sort_by_key(|a| a.media_check_due_at);
        Ok(due)
    }

    async fn check_account(&self, account: &Account) -> Result<(), ApiError> {
        let remote_id = match &account.remote_id {
            Some(id) => id,
            // Unresolved accounts are picked up once profile sync finds
            // their remote id.
            None => return Ok(()),
        };

        let posts = match self.api.recent_media(remote_id, 1).await {
            Ok(posts) => posts,
            Err(ApiError::RateLimitExhausted { attempts }) => {
                log::warn!(
                    "Skipping media check for {} after {} rate-limited attempts",
                    account.handle,
                    attempts
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for post in &posts {
            self.ingest_post(account, post);
        }
        Ok(())
    }

    /// Webhook delivery: resolve each referenced post and feed it through
    /// the same gate as the poll path.
    pub async fn handle_push(&self, media_ids: Vec<String>) {
        for media_id in media_ids {
            let post = match self.api.media(&media_id).await {
                Ok(post) => post,
                Err(e) => {
                    log::warn!("Could not resolve pushed media {}: {}", media_id, e);
                    continue;
                }
            };

            let account = match self.account_for_post(&post) {
                Ok(account) => account,
                Err(e) => {
                    log::error!("Account resolution failed for push {}: {}", media_id, e);
                    continue;
                }
            };
            self.ingest_post(&account, &post);
        }
    }

    fn account_for_post(&self, post: &RemotePost) -> SqliteResult<Account> {
        if let Some(account) = self.db.get_account_by_remote_id(&post.owner_remote_id)? {
            return Ok(account);
        }
        self.db
            .get_or_create_account(&post.owner_handle, Some(&post.owner_remote_id))
    }

    /// The dedup gate. Returns true when the post was accepted and a
    /// NewMedia event emitted; the caller side then owes either a
    /// `confirm_delivery` or a `release`.
    pub fn ingest_post(&self, account: &Account, post: &RemotePost) -> bool {
        // Reread the row. The caller's snapshot may predate a delist
        // confirmed while a sweep was already underway.
        match self.db.get_account(account.id) {
            Ok(Some(current)) if !current.delisted => {}
            Ok(_) => return false,
            Err(e) => {
                log::error!("Account lookup failed for {}: {}", account.handle, e);
                return false;
            }
        }
        if post.items.is_empty() {
            log::warn!("Post {} has no displayable content, dropping", post.id);
            return false;
        }

        match self.db.claim_media(&post.id, account.id) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                log::error!("Dedup claim failed for {}: {}", post.id, e);
                return false;
            }
        }

        let _ = self.events.send(BridgeEvent::NewMedia {
            account_id: account.id,
            handle: account.handle.clone(),
            post: post.clone(),
        });
        true
    }

    /// Record the chat events produced for a post and advance the account's
    /// poll watermark. The claim row stays behind as the durable dedup record.
    pub fn confirm_delivery(
        &self,
        account_id: i64,
        post_id: &str,
        deliveries: &[(String, String)],
    ) -> SqliteResult<()> {
        for (event_id, room_id) in deliveries {
            self.db
                .record_delivered_media(account_id, post_id, event_id, room_id)?;
        }
        let due = Utc::now() + ChronoDuration::seconds((self.media_check_hours * 3600.0) as i64);
        self.db.update_media_check_due(account_id, due)?;
        Ok(())
    }

    /// Give up on an accepted post so a later sweep can retry it.
    pub fn release(&self, post_id: &str) {
        if let Err(e) = self.db.release_media_claim(post_id) {
            log::error!("Could not release claim on {}: {}", post_id, e);
        }
    }
}
