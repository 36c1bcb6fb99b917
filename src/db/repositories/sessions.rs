use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{
        channel_as_str, fmt_datetime, level_as_str, parse_channel, parse_datetime, parse_level,
        parse_optional_datetime, parse_session_status, to_i64, to_u64,
    },
};
use crate::metrics::Metrics;
use crate::models::{Alert, Interval, Session, SessionStatus, Status};

use super::stats::increment_stats;

const SESSION_COLUMNS: &str = "id, user_id, started_at, ended_at, timer_ms, status, studying_ms, \
     distracted_ms, away_ms, total_alerts, focus_score, updated_at";

fn row_to_session(row: &Row) -> Result<Session> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let updated_at: String = row.get("updated_at")?;
    let status: String = row.get("status")?;
    let timer_ms: Option<i64> = row.get("timer_ms")?;

    Ok(Session {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        timer_ms: timer_ms.map(|ms| to_u64(ms, "timer_ms")).transpose()?,
        status: parse_session_status(&status)?,
        intervals: Vec::new(),
        alerts: Vec::new(),
        total_alerts: to_u64(row.get("total_alerts")?, "total_alerts")?,
        metrics: Metrics {
            studying_ms: to_u64(row.get("studying_ms")?, "studying_ms")?,
            distracted_ms: to_u64(row.get("distracted_ms")?, "distracted_ms")?,
            away_ms: to_u64(row.get("away_ms")?, "away_ms")?,
            total_alerts: to_u64(row.get("total_alerts")?, "total_alerts")?,
            focus_score: row.get("focus_score")?,
        },
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn load_children(conn: &Connection, session: &mut Session) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT started_at, ended_at, status
         FROM session_intervals
         WHERE session_id = ?1
         ORDER BY seq",
    )?;
    let mut rows = stmt.query(params![session.id])?;
    while let Some(row) = rows.next()? {
        session.intervals.push(Interval {
            start: parse_datetime(&row.get::<_, String>(0)?, "interval.started_at")?,
            end: parse_optional_datetime(row.get(1)?, "interval.ended_at")?,
            status: Status::parse(&row.get::<_, String>(2)?)?,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT message, raised_at, level, channel
         FROM session_alerts
         WHERE session_id = ?1
         ORDER BY seq",
    )?;
    let mut rows = stmt.query(params![session.id])?;
    while let Some(row) = rows.next()? {
        session.alerts.push(Alert {
            message: row.get(0)?,
            timestamp: parse_datetime(&row.get::<_, String>(1)?, "alert.raised_at")?,
            level: parse_level(&row.get::<_, String>(2)?)?,
            channel: parse_channel(&row.get::<_, String>(3)?)?,
        });
    }

    Ok(())
}

fn query_sessions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    for session in &mut sessions {
        load_children(conn, session)?;
    }
    Ok(sessions)
}

/// Writes the session row and replaces its intervals and alerts.
///
/// Only a running, unfinalized row accepts non-final writes. Once a session is
/// finalized, cleared or interrupted, a checkpoint racing that write cannot reopen
/// it. Returns whether anything was written.
fn upsert_session(
    conn: &Connection,
    session: &Session,
    metrics: &Metrics,
    finalized: bool,
) -> Result<bool> {
    conn.execute(
        "INSERT INTO users (id, total_sessions, total_studying_ms, created_at, updated_at)
         VALUES (?1, 0, 0, ?2, ?2)
         ON CONFLICT(id) DO NOTHING",
        params![session.user_id, fmt_datetime(&session.started_at)],
    )
    .context("failed to ensure user row")?;

    let changed = conn
        .execute(
            "INSERT INTO sessions (id, user_id, started_at, ended_at, timer_ms, status,
                                   studying_ms, distracted_ms, away_ms, total_alerts,
                                   focus_score, finalized, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?3, ?13)
             ON CONFLICT(id) DO UPDATE SET
                 ended_at = excluded.ended_at,
                 timer_ms = excluded.timer_ms,
                 status = excluded.status,
                 studying_ms = excluded.studying_ms,
                 distracted_ms = excluded.distracted_ms,
                 away_ms = excluded.away_ms,
                 total_alerts = excluded.total_alerts,
                 focus_score = excluded.focus_score,
                 finalized = MAX(sessions.finalized, excluded.finalized),
                 updated_at = excluded.updated_at
             WHERE (sessions.finalized = 0 AND sessions.status = ?14)
                OR excluded.finalized = 1",
            params![
                session.id,
                session.user_id,
                fmt_datetime(&session.started_at),
                session.ended_at.as_ref().map(fmt_datetime),
                session.timer_ms.map(to_i64).transpose()?,
                session.status.as_str(),
                to_i64(metrics.studying_ms)?,
                to_i64(metrics.distracted_ms)?,
                to_i64(metrics.away_ms)?,
                to_i64(session.total_alerts)?,
                metrics.focus_score,
                finalized as i64,
                fmt_datetime(&session.updated_at),
                SessionStatus::Running.as_str(),
            ],
        )
        .context("failed to upsert session")?;

    if changed == 0 {
        return Ok(false);
    }

    conn.execute(
        "DELETE FROM session_intervals WHERE session_id = ?1",
        params![session.id],
    )?;
    for (seq, interval) in session.intervals.iter().enumerate() {
        conn.execute(
            "INSERT INTO session_intervals (session_id, seq, started_at, ended_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                seq as i64,
                fmt_datetime(&interval.start),
                interval.end.as_ref().map(fmt_datetime),
                interval.status.as_str(),
            ],
        )
        .context("failed to insert interval")?;
    }

    conn.execute(
        "DELETE FROM session_alerts WHERE session_id = ?1",
        params![session.id],
    )?;
    for (seq, alert) in session.alerts.iter().enumerate() {
        conn.execute(
            "INSERT INTO session_alerts (session_id, seq, message, raised_at, level, channel)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                seq as i64,
                alert.message,
                fmt_datetime(&alert.timestamp),
                level_as_str(alert.level),
                channel_as_str(alert.channel),
            ],
        )
        .context("failed to insert alert")?;
    }

    Ok(true)
}

impl Database {
    /// Non-final write of in-progress state. Idempotent.
    pub async fn save_session(&self, session: &Session) -> Result<bool> {
        let record = session.clone();
        self.transaction(move |tx| upsert_session(tx, &record, &record.metrics, false))
            .await
    }

    /// Final write. User and global totals are bumped only the first time a given
    /// session is finalized; returns whether that happened.
    pub async fn finalize_session(&self, session: &Session, metrics: &Metrics) -> Result<bool> {
        let record = session.clone();
        let metrics = metrics.clone();
        self.transaction(move |tx| {
            let already_final = tx
                .query_row(
                    "SELECT finalized FROM sessions WHERE id = ?1",
                    params![record.id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .map(|finalized| finalized != 0)
                .unwrap_or(false);

            upsert_session(tx, &record, &metrics, true)?;

            if !already_final {
                let at = record.ended_at.unwrap_or(record.updated_at);
                increment_stats(tx, &record.user_id, metrics.studying_ms, at)?;
            }
            Ok(!already_final)
        })
        .await
    }

    /// Most recent still-running session of `user_id` checkpointed at or after `cutoff`.
    pub async fn find_open_session(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND status = ?2 AND ended_at IS NULL AND updated_at >= ?3
                 ORDER BY started_at DESC
                 LIMIT 1"
            );
            Ok(query_sessions(
                conn,
                &sql,
                params![user_id, SessionStatus::Running.as_str(), fmt_datetime(&cutoff)],
            )?
            .into_iter()
            .next())
        })
        .await
    }

    /// Running sessions, for any user, whose last checkpoint is older than `cutoff`.
    pub async fn find_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status = ?1 AND ended_at IS NULL AND updated_at < ?2
                 ORDER BY started_at"
            );
            query_sessions(
                conn,
                &sql,
                params![SessionStatus::Running.as_str(), fmt_datetime(&cutoff)],
            )
        })
        .await
    }

    pub async fn list_sessions_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND started_at >= ?2
                 ORDER BY started_at"
            );
            query_sessions(conn, &sql, params![user_id, fmt_datetime(&since)])
        })
        .await
    }
}
