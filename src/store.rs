//! Local key/value persistence for ledger progress
//!
//! Only plain string/integer pairs are stored: score categories, the two reset
//! day keys and the last conversion day. No schema migrations are needed.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::error::StoreError;

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.get(key)? {
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| StoreError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                }),
            None => Ok(None),
        }
    }

    fn set_i64(&mut self, key: &str, value: i64) -> Result<(), StoreError> {
        self.set(key, &value.to_string())
    }
}

/// SQLite-backed store with a single `kv` table
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Create or open a store at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Store that lives only as long as the connection
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&mut self) -> Result<(), StoreError> {
        // journal_mode returns a row, so it cannot go through execute()
        self.conn
            .query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .optional()?;
        self.conn.execute("PRAGMA synchronous=NORMAL", [])?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;
        Ok(())
    }
}

/// Non-durable store for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sqlite_store_roundtrip_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.set("score.last_reset_date", "2024-05-01").unwrap();
            store.set_i64("score.steps", 42).unwrap();
            store.set_i64("score.steps", 43).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("score.last_reset_date").unwrap().as_deref(),
            Some("2024-05-01")
        );
        assert_eq!(store.get_i64("score.steps").unwrap(), Some(43));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_in_memory_sqlite_upsert() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set("score.water", "1").unwrap();
        store.set("score.water", "2").unwrap();
        assert_eq!(store.get_i64("score.water").unwrap(), Some(2));
    }

    #[test]
    fn test_invalid_integer_value() {
        let mut store = MemoryStore::new();
        store.set("score.task", "lots").unwrap();
        let err = store.get_i64("score.task").unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
    }
}
