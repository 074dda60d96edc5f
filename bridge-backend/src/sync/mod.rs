//! Background reconciliation of remote state into chat state.

pub mod image_diff;
pub mod media;
pub mod profile;

pub use media::MediaSyncEngine;
pub use profile::ProfileSyncEngine;
