//! Typed events from the sync engines to the orchestrator.

use crate::remote::RemotePost;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileField {
    DisplayName(String),
    /// Remote URL of the new avatar; upload happens at the consumer.
    Avatar(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    ProfileChanged {
        account_id: i64,
        handle: String,
        change: ProfileField,
    },
    NewMedia {
        account_id: i64,
        handle: String,
        post: RemotePost,
    },
}
