//! Database table modules - extends Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks with methods for one table group.

mod accounts; // accounts
mod bot_state; // bot_state
mod credentials; // credentials (incl. random pick for the pool)
mod delivered_media; // delivered_media (dedup gate)
mod link_sessions; // pending_link_sessions
mod rooms; // bridged_rooms
