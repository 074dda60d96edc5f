pub mod client;
pub mod types;

pub use client::{ApiClient, ApiError, CredentialPool, RemoteApi, TokenExchanger, DEFAULT_MAX_ATTEMPTS};
pub use types::{MediaItem, MediaKind, RemotePost, RemoteProfile, TokenGrant};
