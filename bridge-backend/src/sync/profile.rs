//! Periodic profile reconciliation.
//!
//! Each tick refreshes the accounts whose cached profile has expired,
//! oldest expiry first, bounded per tick so one slow pass cannot pile up
//! behind the next. Ticks that would overlap are skipped outright.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc::UnboundedSender;

use crate::bridge::events::{BridgeEvent, ProfileField};
use crate::db::Database;
use crate::models::Account;
use crate::remote::{ApiError, RemoteApi, RemoteProfile};
use crate::sync::image_diff;

pub struct ProfileSyncEngine {
    db: Arc<Database>,
    api: Arc<dyn RemoteApi>,
    events: UnboundedSender<BridgeEvent>,
    cache_hours: f64,
    per_tick: usize,
    refreshing: AtomicBool,
}

impl ProfileSyncEngine {
    pub fn new(
        db: Arc<Database>,
        api: Arc<dyn RemoteApi>,
        events: UnboundedSender<BridgeEvent>,
        cache_hours: f64,
        per_tick: usize,
    ) -> Self {
        Self {
            db,
            api,
            events,
            cache_hours,
            per_tick,
            refreshing: AtomicBool::new(false),
        }
    }

    pub async fn start(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        log::info!("Profile sync started (every {:?})", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = &mut shutdown => {
                    log::info!("Profile sync stopped");
                    return;
                }
            }
        }
    }

    pub async fn tick(&self) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            log::warn!("Profile tick still running, skipping this one");
            return;
        }

        let mut due = match self.db.list_accounts_with_expired_profile(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                log::error!("Could not list stale profiles: {}", e);
                self.refreshing.store(false, Ordering::SeqCst);
                return;
            }
        };
        due.truncate(self.per_tick);

        if !due.is_empty() {
            log::info!("Refreshing {} stale profile(s)", due.len());
        }
        for account in due {
            if let Err(e) = self.refresh(&account, false).await {
                log::warn!("Profile refresh failed for {}: {}", account.handle, e);
            }
        }

        self.refreshing.store(false, Ordering::SeqCst);
    }

    /// Refresh one account right away, skipping the avatar byte comparison.
    pub async fn queue_immediate(&self, handle: &str) {
        let account = match self.db.get_account_by_handle(handle) {
            Ok(Some(account)) => account,
            Ok(None) => return,
            Err(e) => {
                log::error!("Account lookup failed for {}: {}", handle, e);
                return;
            }
        };
        if let Err(e) = self.refresh(&account, true).await {
            log::warn!("Immediate profile refresh failed for {}: {}", handle, e);
        }
    }

    async fn refresh(&self, account: &Account, force: bool) -> Result<(), ApiError> {
        let remote_id = match &account.remote_id {
            Some(id) => id.clone(),
            None => match self.resolve_remote_id(account).await? {
                Some(id) => id,
                None => return Ok(()),
            },
        };

        let profile = self.api.profile(&remote_id).await?;

        if profile.handle != account.handle {
            log::info!(
                "Account {} renamed to {}",
                account.handle,
                profile.handle
            );
            self.db
                .update_account_handle(account.id, &profile.handle)?;
        }

        let name_changed = !profile.display_name.is_empty()
            && account.display_name.as_deref() != Some(profile.display_name.as_str());
        let avatar_changed = self.avatar_changed(account, &profile, force).await;

        let expires = Utc::now()
            + ChronoDuration::seconds((self.cache_hours * 3600.0) as i64);
        let name = if name_changed {
            profile.display_name.as_str()
        } else {
            account.display_name.as_deref().unwrap_or_default()
        };
        let avatar = if avatar_changed {
            profile.avatar_url.as_str()
        } else {
            account.avatar_url.as_deref().unwrap_or_default()
        };
        self.db
            .update_account_profile(account.id, name, avatar, expires)?;

        if name_changed {
            let _ = self.events.send(BridgeEvent::ProfileChanged {
                account_id: account.id,
                handle: profile.handle.clone(),
                change: ProfileField::DisplayName(profile.display_name.clone()),
            });
        }
        if avatar_changed {
            let _ = self.events.send(BridgeEvent::ProfileChanged {
                account_id: account.id,
                handle: profile.handle.clone(),
                change: ProfileField::Avatar(profile.avatar_url.clone()),
            });
        }
        Ok(())
    }

    /// Name-search resolution for accounts created before their remote id
    /// was known. Anything but exactly one hit is ambiguous and skipped.
    async fn resolve_remote_id(&self, account: &Account) -> Result<Option<String>, ApiError> {
        let matches: Vec<RemoteProfile> = self
            .api
            .search_users(&account.handle)
            .await?
            .into_iter()
            .filter(|p| p.handle == account.handle)
            .collect();
        if matches.len() != 1 {
            log::warn!(
                "Search for {} returned {} exact match(es), skipping",
                account.handle,
                matches.len()
            );
            return Ok(None);
        }
        let remote_id = matches[0].remote_id.clone();
        self.db.set_account_remote_id(account.id, &remote_id)?;
        Ok(Some(remote_id))
    }

    /// URL inequality is only a hint; the decision comes from comparing the
    /// actual pixels unless `force` skips the download.
    async fn avatar_changed(&self, account: &Account, profile: &RemoteProfile, force: bool) -> bool {
        if profile.avatar_url.is_empty() {
            return false;
        }
        let old_url = match &account.avatar_url {
            Some(url) if !url.is_empty() => url,
            _ => return true,
        };
        if *old_url == profile.avatar_url {
            return false;
        }
        if force {
            return true;
        }

        let old_bytes = match self.api.fetch_bytes(old_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Could not fetch stored avatar for {}: {}", account.handle, e);
                return true;
            }
        };
        let new_bytes = match self.api.fetch_bytes(&profile.avatar_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Could not fetch new avatar for {}: {}", account.handle, e);
                return false;
            }
        };
        image_diff::avatar_changed(&old_bytes, &new_bytes)
    }
}
