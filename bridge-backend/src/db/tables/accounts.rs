//! Account table operations

use chrono::{DateTime, Utc};
use rusqlite::Result as SqliteResult;

use super::super::Database;
use crate::models::Account;

const ACCOUNT_COLUMNS: &str = "id, remote_id, handle, display_name, avatar_url, \
     profile_expires_at, media_check_due_at, delisted, created_at, updated_at";

impl Database {
    /// Get an account by handle, creating it if unknown.
    ///
    /// New accounts are created with an already-expired profile so the next
    /// profile tick picks them up.
    pub fn get_or_create_account(
        &self,
        handle: &str,
        remote_id: Option<&str>,
    ) -> SqliteResult<Account> {
        if let Some(account) = self.get_account_by_handle(handle)? {
            // Backfill the remote id if this reference resolved it.
            if account.remote_id.is_none() && remote_id.is_some() {
                self.set_account_remote_id(account.id, remote_id.unwrap())?;
                return Ok(Account {
                    remote_id: remote_id.map(|s| s.to_string()),
                    ..account
                });
            }
            return Ok(account);
        }

        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        conn.execute(
            "INSERT INTO accounts (remote_id, handle, profile_expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3, ?3)",
            rusqlite::params![remote_id, handle, &now_str],
        )?;

        let id = conn.last_insert_rowid();

        Ok(Account {
            id,
            remote_id: remote_id.map(|s| s.to_string()),
            handle: handle.to_string(),
            display_name: None,
            avatar_url: None,
            profile_expires_at: now,
            media_check_due_at: None,
            delisted: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_account(&self, id: i64) -> SqliteResult<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))?;
        Ok(stmt.query_row([id], Self::row_to_account).ok())
    }

    pub fn get_account_by_handle(&self, handle: &str) -> SqliteResult<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE handle = ?1",
            ACCOUNT_COLUMNS
        ))?;
        Ok(stmt.query_row([handle], Self::row_to_account).ok())
    }

    pub fn get_account_by_remote_id(&self, remote_id: &str) -> SqliteResult<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE remote_id = ?1",
            ACCOUNT_COLUMNS
        ))?;
        Ok(stmt.query_row([remote_id], Self::row_to_account).ok())
    }

    pub fn set_account_remote_id(&self, id: i64, remote_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET remote_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![remote_id, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Handles can be renamed upstream; the remote id is the stable key.
    pub fn update_account_handle(&self, id: i64, handle: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET handle = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![handle, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn update_account_profile(
        &self,
        id: i64,
        display_name: &str,
        avatar_url: &str,
        expires_at: DateTime<Utc>,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET display_name = ?1, avatar_url = ?2, profile_expires_at = ?3,
             updated_at = ?4 WHERE id = ?5",
            rusqlite::params![
                display_name,
                avatar_url,
                expires_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    pub fn update_media_check_due(&self, id: i64, due_at: DateTime<Utc>) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET media_check_due_at = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![due_at.to_rfc3339(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Soft-delist. Blocks both ingestion paths at account resolution.
    pub fn set_account_delisted(&self, id: i64) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET delisted = 1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Accounts whose profile cache has expired, oldest expiry first.
    pub fn list_accounts_with_expired_profile(
        &self,
        now: DateTime<Utc>,
    ) -> SqliteResult<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE delisted = 0 AND profile_expires_at <= ?1
             ORDER BY profile_expires_at ASC",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map([now.to_rfc3339()], Self::row_to_account)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(accounts)
    }

    /// Accounts whose media watermark has passed (or was never set),
    /// oldest watermark first. NULL watermarks sort before everything.
    pub fn list_accounts_due_media_check(
        &self,
        now: DateTime<Utc>,
    ) -> SqliteResult<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts
             WHERE delisted = 0 AND (media_check_due_at IS NULL OR media_check_due_at <= ?1)
             ORDER BY media_check_due_at IS NOT NULL, media_check_due_at ASC",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map([now.to_rfc3339()], Self::row_to_account)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(accounts)
    }

    /// Accounts the chat user holds credentials for.
    pub fn list_accounts_for_chat_user(&self, chat_user_id: &str) -> SqliteResult<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT a.{} FROM accounts a
             INNER JOIN credentials c ON c.account_id = a.id
             WHERE c.chat_user_id = ?1
             ORDER BY a.id ASC",
            ACCOUNT_COLUMNS.replace(", ", ", a.")
        ))?;
        let accounts = stmt
            .query_map([chat_user_id], Self::row_to_account)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(accounts)
    }

    pub(crate) fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let profile_expires_str: String = row.get(5)?;
        let media_due_str: Option<String> = row.get(6)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        Ok(Account {
            id: row.get(0)?,
            remote_id: row.get(1)?,
            handle: row.get(2)?,
            display_name: row.get(3)?,
            avatar_url: row.get(4)?,
            profile_expires_at: parse_ts(&profile_expires_str),
            media_check_due_at: media_due_str.as_deref().map(parse_ts),
            delisted: row.get::<_, i32>(7)? != 0,
            created_at: parse_ts(&created_at_str),
            updated_at: parse_ts(&updated_at_str),
        })
    }
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn create_then_lookup_roundtrips() {
        let db = Database::new_in_memory().unwrap();
        let account = db.get_or_create_account("alice_feed", Some("123")).unwrap();
        assert_eq!(account.handle, "alice_feed");
        assert_eq!(account.remote_id.as_deref(), Some("123"));
        assert!(!account.delisted);

        let again = db.get_or_create_account("alice_feed", None).unwrap();
        assert_eq!(again.id, account.id);

        let by_remote = db.get_account_by_remote_id("123").unwrap().unwrap();
        assert_eq!(by_remote.id, account.id);
    }

    #[test]
    fn remote_id_backfilled_on_later_reference() {
        let db = Database::new_in_memory().unwrap();
        let account = db.get_or_create_account("bob_feed", None).unwrap();
        assert!(account.remote_id.is_none());

        let resolved = db.get_or_create_account("bob_feed", Some("456")).unwrap();
        assert_eq!(resolved.id, account.id);
        assert_eq!(resolved.remote_id.as_deref(), Some("456"));
    }

    #[test]
    fn expired_profiles_listed_oldest_first() {
        let db = Database::new_in_memory().unwrap();
        let now = Utc::now();
        let a = db.get_or_create_account("a", None).unwrap();
        let b = db.get_or_create_account("b", None).unwrap();
        let c = db.get_or_create_account("c", None).unwrap();

        db.update_account_profile(a.id, "A", "u", now - Duration::hours(1))
            .unwrap();
        db.update_account_profile(b.id, "B", "u", now - Duration::hours(3))
            .unwrap();
        db.update_account_profile(c.id, "C", "u", now + Duration::hours(1))
            .unwrap();

        let expired = db.list_accounts_with_expired_profile(now).unwrap();
        let ids: Vec<i64> = expired.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn media_check_listing_orders_by_watermark() {
        let db = Database::new_in_memory().unwrap();
        let now = Utc::now();
        let a = db.get_or_create_account("a", None).unwrap();
        let b = db.get_or_create_account("b", None).unwrap();
        let c = db.get_or_create_account("c", None).unwrap();

        db.update_media_check_due(a.id, now - Duration::minutes(10))
            .unwrap();
        db.update_media_check_due(b.id, now - Duration::minutes(5))
            .unwrap();
        // c keeps a NULL watermark and sorts first.

        let due = db.list_accounts_due_media_check(now).unwrap();
        let ids: Vec<i64> = due.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[test]
    fn delisted_accounts_drop_out_of_scans() {
        let db = Database::new_in_memory().unwrap();
        let now = Utc::now();
        let a = db.get_or_create_account("a", None).unwrap();
        db.set_account_delisted(a.id).unwrap();

        assert!(db.list_accounts_with_expired_profile(now).unwrap().is_empty());
        assert!(db.list_accounts_due_media_check(now).unwrap().is_empty());
        assert!(db.get_account(a.id).unwrap().unwrap().delisted);
    }
}
