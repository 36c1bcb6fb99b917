use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::models::{Session, SessionStatus};

/// Totals over the sessions a user started on one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub date: NaiveDate,
    pub sessions_count: usize,
    pub total_focus_ms: u64,
    /// Studying time in hours, two decimals.
    pub total_focus_hours: f64,
    /// Mean focus score across the day's sessions, one decimal; 0 with no sessions.
    pub avg_focus_score: f64,
}

/// Force-cleared sessions are left out; every other status counts.
pub fn summarize_day(date: NaiveDate, sessions: &[Session]) -> DailySummary {
    let counted: Vec<&Session> = sessions
        .iter()
        .filter(|session| session.started_at.date_naive() == date)
        .filter(|session| session.status != SessionStatus::Cleared)
        .collect();

    let total_focus_ms: u64 = counted.iter().map(|session| session.metrics.studying_ms).sum();
    let avg_focus_score = if counted.is_empty() {
        0.0
    } else {
        let sum: f64 = counted.iter().map(|session| session.metrics.focus_score).sum();
        round_to(sum / counted.len() as f64, 1)
    };

    DailySummary {
        date,
        sessions_count: counted.len(),
        total_focus_ms,
        total_focus_hours: round_to(total_focus_ms as f64 / 3_600_000.0, 2),
        avg_focus_score,
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub async fn daily_summary(db: &Database, user_id: &str, date: NaiveDate) -> Result<DailySummary> {
    let day_start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid day {date}"))?
        .and_utc();
    let sessions = db.list_sessions_since(user_id, day_start).await?;
    let sessions: Vec<Session> = sessions
        .into_iter()
        .filter(|session| session.started_at < day_start + Duration::days(1))
        .collect();
    Ok(summarize_day(date, &sessions))
}

pub async fn today_summary(db: &Database, user_id: &str, now: DateTime<Utc>) -> Result<DailySummary> {
    daily_summary(db, user_id, now.date_naive()).await
}
