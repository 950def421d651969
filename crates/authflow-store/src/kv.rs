use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use authflow_core::error::{AuthflowError, Result};
use authflow_core::traits::{Clock, KvStore, SystemClock};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);";

fn db_err(e: rusqlite::Error) -> AuthflowError {
    AuthflowError::Database(e.to_string())
}

/// Expiring key-value store backed by SQLite.
///
/// Expired rows are invisible to every read and conditional write; they are
/// physically removed lazily on conflicting writes and by [`SqliteKv::purge_expired`].
pub struct SqliteKv {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteKv {
    /// Open or create a SQLite key-value store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthflowError::Database(format!("Failed to create store directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite kv store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used to evaluate expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn expiry_ms(&self, ttl: Duration) -> i64 {
        self.now_ms().saturating_add(ttl.as_millis() as i64)
    }

    /// Delete every expired row. Returns the number of rows removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.now_ms();
        let conn = self
            .conn
            .lock()
            .map_err(|e| AuthflowError::Database(e.to_string()))?;
        let removed = conn
            .execute("DELETE FROM kv WHERE expires_at <= ?1", params![now])
            .map_err(db_err)?;
        info!(removed, "Purged expired kv rows");
        Ok(removed)
    }

    /// Number of rows still live.
    pub fn live_count(&self) -> Result<usize> {
        let now = self.now_ms();
        let conn = self
            .conn
            .lock()
            .map_err(|e| AuthflowError::Database(e.to_string()))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM kv WHERE expires_at > ?1",
                params![now],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as usize)
    }

    fn set_nx_sync(&self, pairs: &[(String, String)], expires_at: i64, now: i64) -> Result<bool> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| AuthflowError::Database(e.to_string()))?;
        let tx = conn.transaction().map_err(db_err)?;

        for (key, _) in pairs {
            let live: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM kv WHERE key = ?1 AND expires_at > ?2",
                    params![key, now],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            if live.is_some() {
                debug!(key = %key, "set_nx missed: key exists");
                return Ok(false);
            }
        }

        for (key, value) in pairs {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expires_at],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(true)
    }
}

impl KvStore for SqliteKv {
    fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<bool>> {
        let pairs = vec![(key.to_string(), value.to_string())];
        let now = self.now_ms();
        let expires_at = self.expiry_ms(ttl);
        Box::pin(async move { self.set_nx_sync(&pairs, expires_at, now) })
    }

    fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<bool>> {
        let key = key.to_string();
        let value = value.to_string();
        let now = self.now_ms();
        let expires_at = self.expiry_ms(ttl);

        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| AuthflowError::Database(e.to_string()))?;
            let changed = conn
                .execute(
                    "UPDATE kv SET value = ?2, expires_at = ?3 WHERE key = ?1 AND expires_at > ?4",
                    params![key, value, expires_at, now],
                )
                .map_err(db_err)?;
            if changed == 0 {
                debug!(key = %key, "set_xx missed: key absent");
            }
            Ok(changed > 0)
        })
    }

    fn set_nx_multi(
        &self,
        pairs: &[(String, String)],
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool>> {
        let pairs = pairs.to_vec();
        let now = self.now_ms();
        let expires_at = self.expiry_ms(ttl);
        Box::pin(async move { self.set_nx_sync(&pairs, expires_at, now) })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let key = key.to_string();
        let now = self.now_ms();

        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| AuthflowError::Database(e.to_string()))?;
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }

    fn del(&self, key: &str) -> BoxFuture<'_, Result<bool>> {
        let key = key.to_string();
        let now = self.now_ms();

        Box::pin(async move {
            let mut conn = self
                .conn
                .lock()
                .map_err(|e| AuthflowError::Database(e.to_string()))?;
            let tx = conn.transaction().map_err(db_err)?;
            let live = tx
                .execute(
                    "DELETE FROM kv WHERE key = ?1 AND expires_at > ?2",
                    params![key, now],
                )
                .map_err(db_err)?;
            // Drop a stale row for the same key too
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(live > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authflow_test_utils::FakeClock;

    fn store() -> (SqliteKv, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::default());
        let kv = SqliteKv::in_memory().unwrap().with_clock(clock.clone());
        (kv, clock)
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_nx_only_if_absent() {
        let (kv, _) = store();
        assert!(kv.set_nx("a", "1", TTL).await.unwrap());
        assert!(!kv.set_nx("a", "2", TTL).await.unwrap());
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_set_xx_only_if_present() {
        let (kv, _) = store();
        assert!(!kv.set_xx("a", "1", TTL).await.unwrap());
        assert!(kv.get("a").await.unwrap().is_none());

        kv.set_nx("a", "1", TTL).await.unwrap();
        assert!(kv.set_xx("a", "2", TTL).await.unwrap());
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_expired_keys_are_absent() {
        let (kv, clock) = store();
        kv.set_nx("a", "1", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(61));

        assert!(kv.get("a").await.unwrap().is_none());
        assert!(!kv.set_xx("a", "2", TTL).await.unwrap());
        assert!(kv.set_nx("a", "3", TTL).await.unwrap());
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_set_xx_refreshes_ttl() {
        let (kv, clock) = store();
        kv.set_nx("a", "1", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(40));
        kv.set_xx("a", "1", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(40));
        assert!(kv.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_nx_multi_is_all_or_nothing() {
        let (kv, _) = store();
        kv.set_nx("b", "old", TTL).await.unwrap();

        let pairs = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        assert!(!kv.set_nx_multi(&pairs, TTL).await.unwrap());
        assert!(kv.get("a").await.unwrap().is_none());
        assert_eq!(kv.get("b").await.unwrap().as_deref(), Some("old"));

        kv.del("b").await.unwrap();
        assert!(kv.set_nx_multi(&pairs, TTL).await.unwrap());
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(kv.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_del_reports_live_keys() {
        let (kv, clock) = store();
        kv.set_nx("a", "1", TTL).await.unwrap();
        assert!(kv.del("a").await.unwrap());
        assert!(!kv.del("a").await.unwrap());

        kv.set_nx("b", "1", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(61));
        assert!(!kv.del("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (kv, clock) = store();
        kv.set_nx("a", "1", Duration::from_secs(10)).await.unwrap();
        kv.set_nx("b", "1", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(30));

        assert_eq!(kv.purge_expired().unwrap(), 1);
        assert_eq!(kv.live_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("authflow_kv_test_{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("kv.db");
        {
            let kv = SqliteKv::open(&path).unwrap();
            kv.set_nx("a", "1", TTL).await.unwrap();
        }
        let reopened = SqliteKv::open(&path).unwrap();
        assert_eq!(reopened.get("a").await.unwrap().as_deref(), Some("1"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
