use std::env;

use crate::remote::DEFAULT_MAX_ATTEMPTS;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub database_url: String,
    /// Externally reachable base URL of this service, no trailing slash.
    pub public_url_base: String,

    pub remote_api_base: String,
    pub remote_client_id: String,
    pub remote_client_secret: String,
    pub api_max_attempts: u32,

    pub homeserver_url: String,
    pub homeserver_domain: String,
    pub as_token: String,
    pub hs_token: String,
    pub bot_localpart: String,
    pub bot_display_name: String,
    pub bot_avatar_url: String,

    /// How long a delivered post defers the next poll of its account.
    pub media_check_hours: f64,
    pub media_poll_seconds: u64,
    pub profile_tick_minutes: u64,
    pub profile_cache_hours: f64,
    pub profile_updates_per_tick: usize,
    pub confirm_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid number"),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "./.db/bridge.db".to_string()),
            public_url_base: env::var("PUBLIC_URL_BASE").expect("PUBLIC_URL_BASE must be set"),

            remote_api_base: env::var("REMOTE_API_BASE")
                .unwrap_or_else(|_| "https://api.instagram.com".to_string()),
            remote_client_id: env::var("REMOTE_CLIENT_ID").expect("REMOTE_CLIENT_ID must be set"),
            remote_client_secret: env::var("REMOTE_CLIENT_SECRET")
                .expect("REMOTE_CLIENT_SECRET must be set"),
            api_max_attempts: env::var("API_MAX_ATTEMPTS")
                .unwrap_or_else(|_| DEFAULT_MAX_ATTEMPTS.to_string())
                .parse()
                .expect("API_MAX_ATTEMPTS must be a valid number"),

            homeserver_url: env::var("HOMESERVER_URL")
                .unwrap_or_else(|_| "http://localhost:8008".to_string()),
            homeserver_domain: env::var("HOMESERVER_DOMAIN")
                .expect("HOMESERVER_DOMAIN must be set"),
            as_token: env::var("AS_TOKEN").expect("AS_TOKEN must be set"),
            hs_token: env::var("HS_TOKEN").expect("HS_TOKEN must be set"),
            bot_localpart: env::var("BOT_LOCALPART").unwrap_or_else(|_| "_feed".to_string()),
            bot_display_name: env::var("BOT_DISPLAY_NAME")
                .unwrap_or_else(|_| "Feed Bridge".to_string()),
            bot_avatar_url: env::var("BOT_AVATAR_URL").unwrap_or_default(),

            media_check_hours: env::var("MEDIA_CHECK_HOURS")
                .unwrap_or_else(|_| "1.5".to_string())
                .parse()
                .expect("MEDIA_CHECK_HOURS must be a valid number"),
            media_poll_seconds: env::var("MEDIA_POLL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .expect("MEDIA_POLL_SECONDS must be a valid number"),
            profile_tick_minutes: env::var("PROFILE_TICK_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .expect("PROFILE_TICK_MINUTES must be a valid number"),
            profile_cache_hours: env::var("PROFILE_CACHE_HOURS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .expect("PROFILE_CACHE_HOURS must be a valid number"),
            profile_updates_per_tick: env::var("PROFILE_UPDATES_PER_TICK")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .expect("PROFILE_UPDATES_PER_TICK must be a valid number"),
            confirm_timeout_seconds: env::var("CONFIRM_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .expect("CONFIRM_TIMEOUT_SECONDS must be a valid number"),
        }
    }
}
