//! Session history repository
//!
//! Records that a tutoring call happened, keyed by companion and user.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// One recorded tutoring call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub companion_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Sink for finished-session records
pub trait SessionRecorder: Send + Sync {
    /// Append one record
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be stored
    fn record(&self, companion_id: &str, user_id: &str) -> Result<SessionRecord>;
}

/// `SQLite`-backed session history
#[derive(Clone)]
pub struct SessionHistoryRepo {
    pool: DbPool,
}

impl SessionHistoryRepo {
    /// Create a new session history repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Most recent sessions across all users, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        self.query(
            "SELECT id, companion_id, user_id, created_at
             FROM session_history ORDER BY created_at DESC LIMIT ?1",
            &[&limit_param(limit)],
        )
    }

    /// Sessions for one user, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn for_user(&self, user_id: &str, limit: usize) -> Result<Vec<SessionRecord>> {
        self.query(
            "SELECT id, companion_id, user_id, created_at
             FROM session_history WHERE user_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
            &[&user_id, &limit_param(limit)],
        )
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<SessionRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Database(e.to_string()))?;

        let records = stmt
            .query_map(params, |row| {
                Ok(SessionRecord {
                    id: row.get(0)?,
                    companion_id: row.get(1)?,
                    user_id: row.get(2)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(records)
    }
}

impl SessionRecorder for SessionHistoryRepo {
    fn record(&self, companion_id: &str, user_id: &str) -> Result<SessionRecord> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO session_history (id, companion_id, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            [&id, companion_id, user_id, &now.to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::debug!(companion_id, user_id, "session recorded");

        Ok(SessionRecord {
            id,
            companion_id: companion_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
        })
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> SessionHistoryRepo {
        SessionHistoryRepo::new(init_memory().unwrap())
    }

    #[test]
    fn test_record_and_list() {
        let repo = setup();

        let first = repo.record("tutor-math", "user-1").unwrap();
        let second = repo.record("tutor-science", "user-1").unwrap();
        repo.record("tutor-math", "user-2").unwrap();

        let recent = repo.recent(10).unwrap();
        assert_eq!(recent.len(), 3);

        let mine = repo.for_user("user-1", 10).unwrap();
        let ids: Vec<_> = mine.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id.as_str()));
        assert!(ids.contains(&second.id.as_str()));
    }

    #[test]
    fn test_limit() {
        let repo = setup();
        for _ in 0..5 {
            repo.record("tutor-math", "user-1").unwrap();
        }

        assert_eq!(repo.recent(2).unwrap().len(), 2);
        assert!(repo.for_user("nobody", 10).unwrap().is_empty());
    }
}
