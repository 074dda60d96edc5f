//! Room <-> account linkage operations

use chrono::Utc;
use rusqlite::Result as SqliteResult;

use super::super::Database;
use crate::models::BridgedRoom;

impl Database {
    pub fn link_room(&self, room_id: &str, account_id: i64) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO bridged_rooms (room_id, account_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![room_id, account_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unlink_room(&self, room_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM bridged_rooms WHERE room_id = ?1", [room_id])?;
        Ok(())
    }

    pub fn list_rooms_for_account(&self, account_id: i64) -> SqliteResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT room_id FROM bridged_rooms WHERE account_id = ?1")?;
        let rooms = stmt
            .query_map([account_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rooms)
    }

    pub fn get_room_link(&self, room_id: &str) -> SqliteResult<Option<BridgedRoom>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT room_id, account_id FROM bridged_rooms WHERE room_id = ?1")?;
        Ok(stmt
            .query_row([room_id], |row| {
                Ok(BridgedRoom {
                    room_id: row.get(0)?,
                    account_id: row.get(1)?,
                })
            })
            .ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_lookup_unlink() {
        let db = Database::new_in_memory().unwrap();
        let a = db.get_or_create_account("a", Some("1")).unwrap();

        db.link_room("!r:example.org", a.id).unwrap();
        db.link_room("!r:example.org", a.id).unwrap(); // no-op

        assert_eq!(
            db.get_room_link("!r:example.org").unwrap().unwrap().account_id,
            a.id
        );
        assert_eq!(db.list_rooms_for_account(a.id).unwrap().len(), 1);

        db.unlink_room("!r:example.org").unwrap();
        assert!(db.get_room_link("!r:example.org").unwrap().is_none());
    }
}
