use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::Connection;
use tracing::debug;

use authflow_core::error::{AuthflowError, Result};
use authflow_core::traits::Database;

fn db_err(e: rusqlite::Error) -> AuthflowError {
    AuthflowError::Database(e.to_string())
}

/// SQLite connection exposing named savepoints.
///
/// Collaborators that write through [`SqliteDatabase::with_conn`] share the
/// savepoint opened by the interaction service, so a rollback discards them.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Open or create the application database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthflowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        debug!(path = %path.display(), "SQLite database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` against the shared connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AuthflowError::Database(e.to_string()))?;
        f(&conn).map_err(db_err)
    }

    fn exec(&self, sql: String) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AuthflowError::Database(e.to_string()))?;
        conn.execute_batch(&sql).map_err(db_err)
    }
}

/// Savepoint names are interpolated into SQL, so only identifiers are accepted.
fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(AuthflowError::Database(format!(
            "invalid savepoint name: {:?}",
            name
        )))
    }
}

impl Database for SqliteDatabase {
    fn begin_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let result = check_name(name).and_then(|_| self.exec(format!("SAVEPOINT {}", name)));
        Box::pin(async move { result })
    }

    fn release_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let result =
            check_name(name).and_then(|_| self.exec(format!("RELEASE SAVEPOINT {}", name)));
        Box::pin(async move { result })
    }

    /// Rolls back and then releases, so an outermost savepoint also ends its transaction.
    fn rollback_to_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let result = check_name(name).and_then(|_| {
            self.exec(format!(
                "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0};",
                name
            ))
        });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_table() -> SqliteDatabase {
        let db = SqliteDatabase::in_memory().unwrap();
        db.with_conn(|c| c.execute_batch("CREATE TABLE t (v INTEGER NOT NULL);"))
            .unwrap();
        db
    }

    fn count(db: &SqliteDatabase) -> i64 {
        db.with_conn(|c| c.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)))
            .unwrap()
    }

    fn insert(db: &SqliteDatabase) {
        db.with_conn(|c| c.execute("INSERT INTO t (v) VALUES (1)", []))
            .unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let db = db_with_table();
        db.begin_savepoint("interaction_graph").await.unwrap();
        insert(&db);
        assert_eq!(count(&db), 1);
        db.rollback_to_savepoint("interaction_graph").await.unwrap();
        assert_eq!(count(&db), 0);

        // The connection is usable outside any savepoint afterwards
        insert(&db);
        assert_eq!(count(&db), 1);
    }

    #[tokio::test]
    async fn test_release_keeps_writes() {
        let db = db_with_table();
        db.begin_savepoint("interaction_graph").await.unwrap();
        insert(&db);
        db.release_savepoint("interaction_graph").await.unwrap();
        assert_eq!(count(&db), 1);
    }

    #[tokio::test]
    async fn test_release_without_savepoint_fails() {
        let db = db_with_table();
        assert!(db.release_savepoint("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_names() {
        let db = db_with_table();
        assert!(db.begin_savepoint("x; DROP TABLE t").await.is_err());
        assert!(db.begin_savepoint("").await.is_err());
        assert!(db.begin_savepoint("1abc").await.is_err());
        assert_eq!(count(&db), 0);
    }
}
