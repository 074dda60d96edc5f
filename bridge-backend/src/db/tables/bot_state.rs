//! Key/value bot state - small opaque bookkeeping for the bridge identity

use chrono::Utc;
use rusqlite::Result as SqliteResult;

use super::super::Database;

impl Database {
    pub fn get_bot_state(&self, key: &str) -> SqliteResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM bot_state WHERE key = ?1")?;
        Ok(stmt.query_row([key], |row| row.get(0)).ok())
    }

    pub fn set_bot_state(&self, key: &str, value: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bot_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Read a value, lazily creating it from `make` when absent.
    pub fn get_or_init_bot_state<F>(&self, key: &str, make: F) -> SqliteResult<String>
    where
        F: FnOnce() -> String,
    {
        if let Some(value) = self.get_bot_state(key)? {
            return Ok(value);
        }
        let value = make();
        self.set_bot_state(key, &value)?;
        Ok(value)
    }

    /// True when the homeserver transaction id is still in the recent window.
    pub fn txn_already_processed(&self, txn_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_transactions WHERE txn_id = ?1",
            [txn_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Remember a handled transaction id, pruning the window so the table
    /// stays small. Retries can arrive out of order, so a single
    /// most-recent id is not enough.
    pub fn record_processed_txn(&self, txn_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO processed_transactions (txn_id, created_at)
             VALUES (?1, ?2)",
            rusqlite::params![txn_id, Utc::now().to_rfc3339()],
        )?;
        conn.execute(
            "DELETE FROM processed_transactions WHERE rowid NOT IN (
                 SELECT rowid FROM processed_transactions
                 ORDER BY rowid DESC LIMIT 100)",
            [],
        )?;
        Ok(())
    }
}
