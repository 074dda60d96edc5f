//! SQLite database - schema definitions and connection management
//!
//! This file contains:
//! - Database struct definition
//! - Connection management (new, init)
//! - Schema creation and migrations
//!
//! All table operations are in the tables/ subdirectory.

use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

/// Main database wrapper. A single connection behind a Mutex is enough for a
/// single active instance; writes are scoped by primary key and the dedup
/// gate relies on the ingested_media primary key below.
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Create a new database connection and initialize schema.
    ///
    /// Failure here is fatal for the process: the bridge must not enter the
    /// running state without durable storage.
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database. Test helper.
    #[cfg(test)]
    pub fn new_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initialize all database tables and run migrations
    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        // Remote accounts known to the bridge. remote_id stays NULL until the
        // handle is resolved via search or a webhook payload names it.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id TEXT UNIQUE,
                handle TEXT UNIQUE NOT NULL,
                display_name TEXT,
                avatar_url TEXT,
                profile_expires_at TEXT NOT NULL,
                media_check_due_at TEXT,
                delisted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Stored remote-API tokens, bound to the chat user that produced them.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                chat_user_id TEXT NOT NULL,
                token TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_credentials_chat_user ON credentials(chat_user_id)",
            [],
        )?;

        // One-time linking sessions. Read-once: redemption deletes the row.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_link_sessions (
                session_id TEXT PRIMARY KEY,
                chat_user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // The dedup gate. One row per post id ever accepted for delivery;
        // the primary key makes claim-by-insert atomic across the push and
        // poll paths. A failed delivery deletes its row.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ingested_media (
                media_id TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        // Chat events produced per delivered post, one row per room send.
        // Read back by the delist redaction loop.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS delivered_media (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                media_id TEXT NOT NULL,
                chat_event_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(media_id, chat_event_id, room_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_delivered_media_media ON delivered_media(media_id)",
            [],
        )?;

        // Small opaque key/value state for the bridge's own bookkeeping
        // (webhook install token, last-applied bot avatar, ...).
        conn.execute(
            "CREATE TABLE IF NOT EXISTS bot_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Recent homeserver transaction ids, pruned to a bounded window.
        // Lets replays be acked without reprocessing even out of order.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_transactions (
                txn_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Room <-> account linkage.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS bridged_rooms (
                room_id TEXT NOT NULL,
                account_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(room_id, account_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )",
            [],
        )?;

        Ok(())
    }
}
