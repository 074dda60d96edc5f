//! Media dedup claims and delivered-event records

use chrono::Utc;
use rusqlite::Result as SqliteResult;

use super::super::Database;
use super::accounts::parse_ts;
use crate::models::DeliveredMedia;

impl Database {
    /// Claim a post id for delivery. Check and record are the one insert,
    /// so concurrent push and poll ingestion cannot both win. Returns false
    /// when an earlier claim already holds the id; the key is the post id,
    /// scoped globally across rooms.
    pub fn claim_media(&self, media_id: &str, account_id: i64) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO ingested_media (media_id, account_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![media_id, account_id, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    /// Drop a claim after a failed delivery so a later sweep can retry.
    pub fn release_media_claim(&self, media_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM ingested_media WHERE media_id = ?1",
            [media_id],
        )?;
        Ok(())
    }

    /// Race-tolerant insert: a duplicate (media, event, room) triple is
    /// ignored rather than erroring, per the table's uniqueness constraint.
    pub fn record_delivered_media(
        &self,
        account_id: i64,
        media_id: &str,
        chat_event_id: &str,
        room_id: &str,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO delivered_media
             (account_id, media_id, chat_event_id, room_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                account_id,
                media_id,
                chat_event_id,
                room_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Every chat event ever produced for the account, oldest first.
    /// Used by the delist redaction loop.
    pub fn list_delivered_media_for_account(
        &self,
        account_id: i64,
    ) -> SqliteResult<Vec<DeliveredMedia>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, media_id, chat_event_id, room_id, created_at
             FROM delivered_media WHERE account_id = ?1 ORDER BY id ASC",
        )?;
        let records = stmt
            .query_map([account_id], |row| {
                let created_at_str: String = row.get(5)?;
                Ok(DeliveredMedia {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    media_id: row.get(2)?,
                    chat_event_id: row.get(3)?,
                    room_id: row.get(4)?,
                    created_at: parse_ts(&created_at_str),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }
}
