//! Credential table operations

use chrono::Utc;
use rusqlite::Result as SqliteResult;

use super::super::Database;
use super::accounts::parse_ts;
use crate::models::Credential;

impl Database {
    pub fn save_credential(
        &self,
        account_id: i64,
        chat_user_id: &str,
        token: &str,
    ) -> SqliteResult<Credential> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO credentials (account_id, chat_user_id, token, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![account_id, chat_user_id, token, now.to_rfc3339()],
        )?;
        Ok(Credential {
            id: conn.last_insert_rowid(),
            account_id,
            chat_user_id: chat_user_id.to_string(),
            token: token.to_string(),
            created_at: now,
        })
    }

    /// Uniform-random pick among credentials of non-delisted accounts.
    /// No affinity: two calls may return different credentials.
    pub fn get_random_credential(&self) -> SqliteResult<Option<Credential>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.account_id, c.chat_user_id, c.token, c.created_at
             FROM credentials c
             INNER JOIN accounts a ON a.id = c.account_id
             WHERE a.delisted = 0
             ORDER BY RANDOM() LIMIT 1",
        )?;
        Ok(stmt.query_row([], Self::row_to_credential).ok())
    }

    pub fn list_credentials_for_chat_user(
        &self,
        chat_user_id: &str,
    ) -> SqliteResult<Vec<Credential>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, chat_user_id, token, created_at
             FROM credentials WHERE chat_user_id = ?1",
        )?;
        let creds = stmt
            .query_map([chat_user_id], Self::row_to_credential)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(creds)
    }

    /// True when at least one credential exists for the account.
    pub fn account_has_credentials(&self, account_id: i64) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM credentials WHERE account_id = ?1",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Account ids that have at least one stored credential. These accounts
    /// are always part of the poll set regardless of watermark.
    pub fn list_credentialed_account_ids(&self) -> SqliteResult<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT account_id FROM credentials")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Idempotent: deleting an already-empty set is a no-op.
    pub fn delete_credentials_for_chat_user(&self, chat_user_id: &str) -> SqliteResult<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM credentials WHERE chat_user_id = ?1",
            [chat_user_id],
        )
    }

    fn row_to_credential(row: &rusqlite::Row) -> rusqlite::Result<Credential> {
        let created_at_str: String = row.get(4)?;
        Ok(Credential {
            id: row.get(0)?,
            account_id: row.get(1)?,
            chat_user_id: row.get(2)?,
            token: row.get(3)?,
            created_at: parse_ts(&created_at_str),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_pick_skips_delisted_accounts() {
        let db = Database::new_in_memory().unwrap();
        let kept = db.get_or_create_account("kept", Some("1")).unwrap();
        let gone = db.get_or_create_account("gone", Some("2")).unwrap();
        db.save_credential(kept.id, "@u:example.org", "tok-kept")
            .unwrap();
        db.save_credential(gone.id, "@u:example.org", "tok-gone")
            .unwrap();
        db.set_account_delisted(gone.id).unwrap();

        for _ in 0..20 {
            let cred = db.get_random_credential().unwrap().unwrap();
            assert_eq!(cred.token, "tok-kept");
        }
    }

    #[test]
    fn random_pick_empty_pool_returns_none() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.get_random_credential().unwrap().is_none());
    }

    #[test]
    fn delete_for_chat_user_is_idempotent() {
        let db = Database::new_in_memory().unwrap();
        let a = db.get_or_create_account("a", Some("1")).unwrap();
        db.save_credential(a.id, "@u:example.org", "t1").unwrap();
        db.save_credential(a.id, "@u:example.org", "t2").unwrap();

        assert_eq!(db.delete_credentials_for_chat_user("@u:example.org").unwrap(), 2);
        assert_eq!(db.delete_credentials_for_chat_user("@u:example.org").unwrap(), 0);
        assert!(!db.account_has_credentials(a.id).unwrap());
    }
}
