use super::KeyValueStore;
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

const DISMISSED_KEY: &str = "dismissed_notifications";

/// Local durable key-value file, independent of the authoritative store.
#[derive(Debug)]
pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
               key TEXT PRIMARY KEY,
               value_json TEXT NOT NULL,
               updated_at TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn read(&self) -> AppResult<Vec<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::Internal("kv mutex poisoned".to_string()))?;
        let raw = conn
            .query_row("SELECT value_json FROM kv WHERE key = ?1", [DISMISSED_KEY], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|error| AppError::OverlayUnavailable(error.to_string()))?;

        match raw {
            Some(raw) => serde_json::from_str::<Vec<String>>(&raw)
                .map_err(|error| AppError::OverlayUnavailable(format!("corrupt dismissal list: {}", error))),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, keys: &[String]) -> AppResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::Internal("kv mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO kv (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![DISMISSED_KEY, serde_json::to_string(keys)?, Utc::now().to_rfc3339()],
        )
        .map_err(|error| AppError::OverlayUnavailable(error.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get_dismissed_keys(&self) -> AppResult<Vec<String>> {
        self.read()
    }

    async fn set_dismissed_keys(&self, keys: &[String]) -> AppResult<()> {
        self.write(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteKeyValueStore;
    use crate::overlay::KeyValueStore;

    #[tokio::test]
    async fn dismissed_keys_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("local.sqlite");

        {
            let store = SqliteKeyValueStore::new(&path).expect("store");
            assert!(store.get_dismissed_keys().await.expect("empty").is_empty());
            store
                .set_dismissed_keys(&["like:u1:p1".to_string(), "follow:u2".to_string()])
                .await
                .expect("write");
        }

        let reopened = SqliteKeyValueStore::new(&path).expect("reopen");
        assert_eq!(
            reopened.get_dismissed_keys().await.expect("keys"),
            vec!["like:u1:p1".to_string(), "follow:u2".to_string()]
        );
    }
}
