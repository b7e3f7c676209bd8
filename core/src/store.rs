use crate::utils::misc::{day_key_of, get_unix_millis_now, today_day_key, truncate_chars};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Chat text beyond this many characters is cut before storing or sending.
pub const MAX_CHAT_TEXT_CHARS: usize = 2_000;

const DEVICE_ID_KEY: &str = "device_id";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    from_device_id TEXT NOT NULL,
    to_device_id   TEXT,
    text           TEXT NOT NULL,
    ts             INTEGER NOT NULL,
    day_key        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_day_key ON messages(day_key);
CREATE INDEX IF NOT EXISTS idx_messages_from_to ON messages(from_device_id, to_device_id);

CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

impl crate::utils::misc::Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

/// One persisted chat line. `to_device_id` of `None` marks a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub from_device_id: String,
    pub to_device_id: Option<String>,
    pub text: String,
    pub ts: u64,
    pub day_key: String,
}

/// Day-scoped chat log plus a small settings table, on SQLite. Messages are
/// ephemeral by design: nothing outlives the local calendar day it was
/// created in once `purge_not_today` runs.
pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Private page cache only; used by tests and ephemeral clients.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }

    /// Store one chat line and return its row id. The day key is derived
    /// from `ts_ms` (caller's clock when omitted), text is char-truncated.
    pub fn create_message(
        &self,
        from_device_id: &str,
        to_device_id: Option<&str>,
        text: &str,
        ts_ms: Option<u64>,
    ) -> Result<i64, Error> {
        let ts = ts_ms.unwrap_or_else(get_unix_millis_now);
        let text = truncate_chars(text, MAX_CHAT_TEXT_CHARS);
        let day_key = day_key_of(ts);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages (from_device_id, to_device_id, text, ts, day_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![from_device_id, to_device_id, text, ts as i64, day_key],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Everything from today, send order.
    pub fn list_today(&self) -> Result<Vec<MessageRow>, Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, from_device_id, to_device_id, text, ts, day_key
             FROM messages WHERE day_key = ?1 ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![today_day_key()], row_to_message)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Today's conversation between `self_id` and `peer_id`: directed lines
    /// both ways plus broadcasts authored by either of them.
    pub fn list_today_with_peer(&self, self_id: &str, peer_id: &str) -> Result<Vec<MessageRow>, Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, from_device_id, to_device_id, text, ts, day_key
             FROM messages
             WHERE day_key = ?1
               AND (
                 (from_device_id = ?2 AND (to_device_id = ?3 OR to_device_id IS NULL))
                 OR
                 (from_device_id = ?3 AND (to_device_id = ?2 OR to_device_id IS NULL))
               )
             ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![today_day_key(), self_id, peer_id], row_to_message)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Today's broadcasts only, send order.
    pub fn list_broadcast_today(&self) -> Result<Vec<MessageRow>, Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, from_device_id, to_device_id, text, ts, day_key
             FROM messages WHERE day_key = ?1 AND to_device_id IS NULL ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![today_day_key()], row_to_message)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete every message whose day key is not today's. Returns the number
    /// of rows removed.
    pub fn purge_not_today(&self) -> Result<usize, Error> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM messages WHERE day_key != ?1", params![today_day_key()])?)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, Error> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), Error> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// The installation's device id, minted as a random UUID on first call
    /// and stable forever after.
    pub fn ensure_device_id(&self) -> Result<String, Error> {
        if let Some(id) = self.get_setting(DEVICE_ID_KEY)? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.set_setting(DEVICE_ID_KEY, &id)?;
        Ok(id)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        from_device_id: row.get(1)?,
        to_device_id: row.get(2)?,
        text: row.get(3)?,
        ts: row.get::<_, i64>(4)? as u64,
        day_key: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn store() -> MessageStore {
        MessageStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_and_list_today_in_send_order() {
        let store = store();
        let now = get_unix_millis_now();
        store.create_message("a", None, "second", Some(now)).unwrap();
        store.create_message("a", Some("b"), "first", Some(now - 10)).unwrap();

        let today = store.list_today().unwrap();
        assert_eq!(today.len(), 2);
        assert_eq!(today[0].text, "first");
        assert_eq!(today[0].to_device_id.as_deref(), Some("b"));
        assert_eq!(today[1].text, "second");
        assert_eq!(today[1].to_device_id, None);
        assert_eq!(today[0].day_key, today_day_key());
    }

    #[test]
    fn test_create_truncates_text() {
        let store = store();
        let long = "x".repeat(MAX_CHAT_TEXT_CHARS + 50);
        store.create_message("a", None, &long, None).unwrap();
        let today = store.list_today().unwrap();
        assert_eq!(today[0].text.chars().count(), MAX_CHAT_TEXT_CHARS);
    }

    #[test]
    fn test_list_today_with_peer_includes_broadcasts_from_both() {
        let store = store();
        let now = get_unix_millis_now();
        store.create_message("me", Some("peer"), "me->peer", Some(now)).unwrap();
        store.create_message("peer", Some("me"), "peer->me", Some(now + 1)).unwrap();
        store.create_message("me", None, "me broadcast", Some(now + 2)).unwrap();
        store.create_message("peer", None, "peer broadcast", Some(now + 3)).unwrap();
        // outside the pair in every direction
        store.create_message("me", Some("other"), "me->other", Some(now + 4)).unwrap();
        store.create_message("other", Some("me"), "other->me", Some(now + 5)).unwrap();
        store.create_message("other", None, "other broadcast", Some(now + 6)).unwrap();

        let texts: Vec<_> =
            store.list_today_with_peer("me", "peer").unwrap().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["me->peer", "peer->me", "me broadcast", "peer broadcast"]);
    }

    #[test]
    fn test_list_broadcast_today_excludes_directed() {
        let store = store();
        let now = get_unix_millis_now();
        store.create_message("a", Some("b"), "directed", Some(now)).unwrap();
        store.create_message("a", None, "broadcast", Some(now + 1)).unwrap();

        let broadcasts = store.list_broadcast_today().unwrap();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].text, "broadcast");
    }

    #[test]
    fn test_purge_not_today_keeps_only_today() {
        let store = store();
        let now = get_unix_millis_now();
        store.create_message("a", None, "yesterday", Some(now - DAY_MS)).unwrap();
        store.create_message("a", None, "today", Some(now)).unwrap();
        assert_eq!(store.list_today().unwrap().len(), 1);

        let removed = store.purge_not_today().unwrap();
        assert_eq!(removed, 1);
        let today = store.list_today().unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].text, "today");

        // nothing left to purge
        assert_eq!(store.purge_not_today().unwrap(), 0);
    }

    #[test]
    fn test_unrepresentable_timestamp_is_purgeable_not_fatal() {
        let store = store();
        store.create_message("a", None, "from nowhere", Some(u64::MAX)).unwrap();
        assert!(store.list_today().unwrap().is_empty());
        assert_eq!(store.purge_not_today().unwrap(), 1);
    }

    #[test]
    fn test_settings_roundtrip_and_upsert() {
        let store = store();
        assert_eq!(store.get_setting("k").unwrap(), None);
        store.set_setting("k", "v1").unwrap();
        assert_eq!(store.get_setting("k").unwrap().as_deref(), Some("v1"));
        store.set_setting("k", "v2").unwrap();
        assert_eq!(store.get_setting("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_ensure_device_id_is_stable() {
        let store = store();
        let id = store.ensure_device_id().unwrap();
        assert_eq!(id.len(), 36);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
        assert_eq!(store.ensure_device_id().unwrap(), id);
    }
}
