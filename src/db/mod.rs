//! Session history storage
//!
//! One SQLite file under the data directory holds a row per finished call.
//! Writes run on `spawn_blocking` from the host binding.

mod history;
mod schema;

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use history::{SessionHistoryRepo, SessionRecord, SessionRecorder};
pub use schema::SCHEMA_VERSION;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// How long a writer waits on a locked database file
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the history database at `path`, creating its directory and schema
///
/// # Errors
///
/// Returns error if the file cannot be opened or migrated
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Database(format!("cannot create {}: {e}", dir.display())))?;
    }

    let manager =
        SqliteConnectionManager::file(path).with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
    let pool = migrated(manager, 2)?;

    tracing::info!(path = %path.display(), version = SCHEMA_VERSION, "history database ready");
    Ok(pool)
}

/// Open a private in-memory history database
///
/// Limited to one connection, since every in-memory connection is its own
/// database.
///
/// # Errors
///
/// Returns error if the schema cannot be created
pub fn init_memory() -> Result<DbPool> {
    migrated(SqliteConnectionManager::memory(), 1)
}

fn migrated(manager: SqliteConnectionManager, max_size: u32) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_version(pool: &DbPool) -> i32 {
        pool.get()
            .unwrap()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn memory_database_is_migrated() {
        let pool = init_memory().unwrap();
        assert_eq!(schema_version(&pool), SCHEMA_VERSION);
        assert_eq!(pool.max_size(), 1);
    }

    #[test]
    fn file_database_creates_its_directory() {
        let dir = std::env::temp_dir().join(format!("voice-tutor-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("history.db");

        let pool = init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(schema_version(&pool), SCHEMA_VERSION);

        // reopening an existing file keeps the schema
        drop(pool);
        let pool = init(&path).unwrap();
        assert_eq!(schema_version(&pool), SCHEMA_VERSION);

        drop(pool);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
