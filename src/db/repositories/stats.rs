use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{fmt_datetime, parse_datetime, to_i64, to_u64},
    models::{GlobalStats, UserStats},
};

/// Adds one finished session to the user's and the global totals.
/// Callers run this inside the transaction that finalizes the session.
pub(super) fn increment_stats(
    conn: &Connection,
    user_id: &str,
    studying_ms: u64,
    at: DateTime<Utc>,
) -> Result<()> {
    let studying_ms = to_i64(studying_ms)?;
    let at = fmt_datetime(&at);

    conn.execute(
        "INSERT INTO users (id, total_sessions, total_studying_ms, created_at, updated_at)
         VALUES (?1, 1, ?2, ?3, ?3)
         ON CONFLICT(id) DO UPDATE SET
             total_sessions = users.total_sessions + 1,
             total_studying_ms = users.total_studying_ms + excluded.total_studying_ms,
             updated_at = excluded.updated_at",
        params![user_id, studying_ms, at],
    )
    .context("failed to update user stats")?;

    conn.execute(
        "UPDATE global_stats
         SET total_sessions = total_sessions + 1,
             total_studying_ms = total_studying_ms + ?1,
             updated_at = ?2
         WHERE id = 1",
        params![studying_ms, at],
    )
    .context("failed to update global stats")?;

    Ok(())
}

impl Database {
    pub async fn get_user_stats(&self, user_id: &str) -> Result<Option<UserStats>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, total_sessions, total_studying_ms, created_at, updated_at
                     FROM users WHERE id = ?1",
                    params![user_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(user_id, sessions, studying, created, updated)| {
                Ok(UserStats {
                    user_id,
                    total_sessions: to_u64(sessions, "total_sessions")?,
                    total_studying_ms: to_u64(studying, "total_studying_ms")?,
                    created_at: parse_datetime(&created, "created_at")?,
                    updated_at: parse_datetime(&updated, "updated_at")?,
                })
            })
            .transpose()
        })
        .await
    }

    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        self.execute(|conn| {
            let (sessions, studying, updated) = conn.query_row(
                "SELECT total_sessions, total_studying_ms, updated_at FROM global_stats WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )?;

            Ok(GlobalStats {
                total_sessions: to_u64(sessions, "total_sessions")?,
                total_studying_ms: to_u64(studying, "total_studying_ms")?,
                updated_at: parse_datetime(&updated, "updated_at")?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fresh_database_has_zero_totals() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::new(dir.path().join("stats.sqlite3"))?;

        let global = db.get_global_stats().await?;
        assert_eq!(global.total_sessions, 0);
        assert_eq!(global.total_studying_ms, 0);
        assert!(db.get_user_stats("nobody").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_increment_accumulates_per_user_and_globally() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::new(dir.path().join("stats.sqlite3"))?;
        let now = Utc::now();

        db.execute(move |conn| {
            increment_stats(conn, "ada", 1_000, now)?;
            increment_stats(conn, "ada", 2_500, now)?;
            increment_stats(conn, "bob", 400, now)?;
            Ok(())
        })
        .await?;

        let ada = db.get_user_stats("ada").await?.expect("ada stats");
        assert_eq!(ada.total_sessions, 2);
        assert_eq!(ada.total_studying_ms, 3_500);

        let global = db.get_global_stats().await?;
        assert_eq!(global.total_sessions, 3);
        assert_eq!(global.total_studying_ms, 3_900);
        Ok(())
    }
}
