use rusqlite::Connection;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
  user_key TEXT PRIMARY KEY,
  oaid TEXT NOT NULL,
  mi_id TEXT NOT NULL,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
  user_key TEXT NOT NULL,
  conversation_id TEXT NOT NULL,
  internal_conv_id TEXT NOT NULL,
  history_json TEXT NOT NULL,
  updated_at INTEGER NOT NULL,
  PRIMARY KEY (user_key, conversation_id)
);
";

pub const INSERT_USER: &str =
    "INSERT OR IGNORE INTO users (user_key, oaid, mi_id, created_at) VALUES (?1, ?2, ?3, ?4)";

pub const SELECT_USER: &str = "SELECT oaid, mi_id FROM users WHERE user_key = ?1";

pub const UPSERT_CONVERSATION: &str = "
INSERT INTO conversations (user_key, conversation_id, internal_conv_id, history_json, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(user_key, conversation_id)
DO UPDATE SET internal_conv_id = excluded.internal_conv_id,
              history_json = excluded.history_json,
              updated_at = excluded.updated_at";

pub const SELECT_CONVERSATION: &str = "SELECT internal_conv_id, history_json FROM conversations \
     WHERE user_key = ?1 AND conversation_id = ?2";

/// Connection settings shared by the writer and every reader.
pub fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("schema.db")).unwrap();
        configure(&conn).unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_upsert_replaces_history() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("upsert.db")).unwrap();
        migrate(&conn).unwrap();

        conn.execute(UPSERT_CONVERSATION, ("u", "default", "id1", "[]", 1))
            .unwrap();
        conn.execute(UPSERT_CONVERSATION, ("u", "default", "id1", "[1]", 2))
            .unwrap();

        let (id, history): (String, String) = conn
            .query_row(SELECT_CONVERSATION, ("u", "default"), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(id, "id1");
        assert_eq!(history, "[1]");
    }
}
