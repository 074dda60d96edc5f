//! Rate-limited remote-API access with credential rotation.
//!
//! Every call picks a credential at random from the pool and, on a
//! rate-limit response, retries with a fresh pick up to a fixed attempt
//! count. The remote quota is per-credential, so rotation is the
//! mitigation rather than backoff sleep.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::db::Database;
use crate::models::Credential;
use crate::remote::types::{RemotePost, RemoteProfile, TokenGrant};

/// Default maximum attempts per logical call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug)]
pub enum ApiError {
    /// No usable credential is stored.
    NoCredentials,
    /// Every attempt hit the rate limit. The caller skips its unit of work.
    RateLimitExhausted { attempts: u32 },
    /// Non-rate-limit remote failure. Propagated without retry.
    Remote { status: u16, message: String },
    Http(reqwest::Error),
    Db(rusqlite::Error),
    /// The response decoded as JSON but not into the expected shape.
    Malformed(&'static str),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no stored credentials"),
            Self::RateLimitExhausted { attempts } => {
                write!(f, "rate limit exhausted after {} attempts", attempts)
            }
            Self::Remote { status, message } => {
                write!(f, "remote API error (status {}): {}", status, message)
            }
            Self::Http(e) => write!(f, "http error: {}", e),
            Self::Db(e) => write!(f, "database error: {}", e),
            Self::Malformed(what) => write!(f, "malformed response: {}", what),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Db(e)
    }
}

/// Owns credential selection. Read-only; knows nothing about retry policy.
pub struct CredentialPool {
    db: Arc<Database>,
}

impl CredentialPool {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Uniform-random pick among credentials of non-delisted accounts.
    pub fn pick(&self) -> Result<Credential, ApiError> {
        self.db
            .get_random_credential()?
            .ok_or(ApiError::NoCredentials)
    }
}

/// Seam for the OAuth code exchange, so linking can be tested without the
/// remote endpoint.
#[async_trait::async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, ApiError>;
}

/// Read-side surface of the remote service. The sync engines and the
/// orchestrator depend on this trait rather than the concrete client so
/// they can be exercised against a fake.
#[async_trait::async_trait]
pub trait RemoteApi: Send + Sync {
    async fn search_users(&self, handle: &str) -> Result<Vec<RemoteProfile>, ApiError>;
    async fn profile(&self, remote_id: &str) -> Result<RemoteProfile, ApiError>;
    async fn recent_media(&self, remote_id: &str, count: u32) -> Result<Vec<RemotePost>, ApiError>;
    async fn media(&self, media_id: &str) -> Result<RemotePost, ApiError>;
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError>;
    async fn list_subscription_callbacks(&self) -> Result<Vec<String>, ApiError>;
    async fn create_subscription(
        &self,
        callback_url: &str,
        verify_token: &str,
    ) -> Result<(), ApiError>;
}

pub struct ApiClient {
    pool: CredentialPool,
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
    max_attempts: u32,
}

impl ApiClient {
    pub fn new(
        pool: CredentialPool,
        api_base: String,
        client_id: String,
        client_secret: String,
        max_attempts: u32,
    ) -> Self {
        Self {
            pool,
            http: reqwest::Client::new(),
            api_base,
            client_id,
            client_secret,
            max_attempts,
        }
    }

    /// GET an API path, rotating credentials on 429 up to `max_attempts`.
    /// Returns the payload under the response's `data` envelope.
    async fn get_with_rotation(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        for attempt in 1..=self.max_attempts {
            let credential = self.pool.pick()?;
            let url = format!("{}{}", self.api_base, path);
            let response = self
                .http
                .get(&url)
                .query(query)
                .query(&[("access_token", credential.token.as_str())])
                .send()
                .await?;

            let status = response.status();
            if status.as_u16() == 429 {
                log::warn!(
                    "Rate limited on {} (attempt {}/{}), rotating credential",
                    path,
                    attempt,
                    self.max_attempts
                );
                continue;
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(ApiError::Remote {
                    status: status.as_u16(),
                    message,
                });
            }

            let body: Value = response.json().await?;
            return body
                .get("data")
                .cloned()
                .ok_or(ApiError::Malformed("missing data envelope"));
        }

        Err(ApiError::RateLimitExhausted {
            attempts: self.max_attempts,
        })
    }

    pub async fn profile(&self, remote_id: &str) -> Result<RemoteProfile, ApiError> {
        let data = self
            .get_with_rotation(&format!("/v1/users/{}", remote_id), &[])
            .await?;
        RemoteProfile::from_value(&data).ok_or(ApiError::Malformed("user profile"))
    }

    /// Name search. Returns every match; the caller decides what an
    /// ambiguous result means.
    pub async fn search_users(&self, handle: &str) -> Result<Vec<RemoteProfile>, ApiError> {
        let data = self
            .get_with_rotation("/v1/users/search", &[("q", handle)])
            .await?;
        let matches = data
            .as_array()
            .ok_or(ApiError::Malformed("user search"))?
            .iter()
            .filter_map(RemoteProfile::from_value)
            .collect();
        Ok(matches)
    }

    /// Most recent posts for an account, newest first.
    pub async fn recent_media(
        &self,
        remote_id: &str,
        count: u32,
    ) -> Result<Vec<RemotePost>, ApiError> {
        let count = count.to_string();
        let data = self
            .get_with_rotation(
                &format!("/v1/users/{}/media/recent", remote_id),
                &[("count", count.as_str())],
            )
            .await?;
        let posts = data
            .as_array()
            .ok_or(ApiError::Malformed("recent media"))?
            .iter()
            .filter_map(RemotePost::from_value)
            .collect();
        Ok(posts)
    }

    /// Resolve one media reference (webhook push path).
    pub async fn media(&self, media_id: &str) -> Result<RemotePost, ApiError> {
        let data = self
            .get_with_rotation(&format!("/v1/media/{}", media_id), &[])
            .await?;
        RemotePost::from_value(&data).ok_or(ApiError::Malformed("media object"))
    }

    /// Plain download with no credential; used for avatars and post content.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Remote {
                status: status.as_u16(),
                message: format!("fetching {}", url),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Subscription list for this app. Client-credential call, no pool.
    pub async fn list_subscription_callbacks(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/v1/subscriptions", self.api_base);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        let body: Value = response.json().await?;
        let callbacks = body
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or(ApiError::Malformed("subscription list"))?
            .iter()
            .filter_map(|s| s.get("callback_url").and_then(|u| u.as_str()))
            .map(|u| u.to_string())
            .collect();
        Ok(callbacks)
    }

    /// Create the media subscription, presenting the one-time verify token
    /// the remote service will echo on the challenge GET.
    pub async fn create_subscription(
        &self,
        callback_url: &str,
        verify_token: &str,
    ) -> Result<(), ApiError> {
        let url = format!("{}/v1/subscriptions/", self.api_base);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("object", "user"),
                ("aspect", "media"),
                ("verify_token", verify_token),
                ("callback_url", callback_url),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenExchanger for ApiClient {
    /// POST the OAuth token endpoint. Not credential-rotated: the exchange
    /// authenticates with the app's own client id/secret.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, ApiError> {
        let url = format!("{}/oauth/access_token", self.api_base);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await?;
        if let Some(message) = body.get("error_message").and_then(|m| m.as_str()) {
            return Err(ApiError::Remote {
                status: status.as_u16(),
                message: message.to_string(),
            });
        }
        TokenGrant::from_value(&body).ok_or(ApiError::Malformed("token exchange"))
    }
}

#[async_trait::async_trait]
impl RemoteApi for ApiClient {
    async fn search_users(&self, handle: &str) -> Result<Vec<RemoteProfile>, ApiError> {
        ApiClient::search_users(self, handle).await
    }

    async fn profile(&self, remote_id: &str) -> Result<RemoteProfile, ApiError> {
        ApiClient::profile(self, remote_id).await
    }

    async fn recent_media(&self, remote_id: &str, count: u32) -> Result<Vec<RemotePost>, ApiError> {
        ApiClient::recent_media(self, remote_id, count).await
    }

    async fn media(&self, media_id: &str) -> Result<RemotePost, ApiError> {
        ApiClient::media(self, media_id).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        ApiClient::fetch_bytes(self, url).await
    }

    async fn list_subscription_callbacks(&self) -> Result<Vec<String>, ApiError> {
        ApiClient::list_subscription_callbacks(self).await
    }

    async fn create_subscription(
        &self,
        callback_url: &str,
        verify_token: &str,
    ) -> Result<(), ApiError> {
        ApiClient::create_subscription(self, callback_url, verify_token).await
    }
}
