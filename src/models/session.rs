use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Alert, Status};
use crate::metrics::Metrics;

/// Number of alerts kept on a session for display.
pub const MAX_RECENT_ALERTS: usize = 10;

/// Persistence lifecycle of a session row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Running,
    Completed,
    Terminated,
    Cleared,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "Running",
            SessionStatus::Completed => "Completed",
            SessionStatus::Terminated => "Terminated",
            SessionStatus::Cleared => "Cleared",
            SessionStatus::Interrupted => "Interrupted",
        }
    }
}

/// Why a session stopped being active.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    Manual,
    TimerElapsed,
    TooMuchTimeAway,
    ForceCleared,
}

impl EndReason {
    pub fn session_status(&self) -> SessionStatus {
        match self {
            EndReason::Manual | EndReason::TimerElapsed => SessionStatus::Completed,
            EndReason::TooMuchTimeAway => SessionStatus::Terminated,
            EndReason::ForceCleared => SessionStatus::Cleared,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            EndReason::Manual => "ended by user",
            EndReason::TimerElapsed => "study timer elapsed",
            EndReason::TooMuchTimeAway => "too much time away",
            EndReason::ForceCleared => "force cleared",
        }
    }
}

/// A span of one confirmed status. `end` is `None` while the span is current.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: Status,
}

impl Interval {
    pub fn open_at(status: Status, at: DateTime<Utc>) -> Self {
        Self {
            start: at,
            end: None,
            status,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Elapsed milliseconds, counting an open interval up to `now`.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> u64 {
        let end = self.end.unwrap_or(now);
        (end - self.start).num_milliseconds().max(0) as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Optional study timer; the session completes on its own once it elapses.
    pub timer_ms: Option<u64>,
    pub status: SessionStatus,
    pub intervals: Vec<Interval>,
    /// Trailing window of the most recent alerts, oldest first.
    pub alerts: Vec<Alert>,
    /// Alerts raised over the whole session, not capped by the window.
    pub total_alerts: u64,
    pub metrics: Metrics,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn begin(id: String, user_id: String, started_at: DateTime<Utc>, timer_ms: Option<u64>) -> Self {
        Self {
            id,
            user_id,
            started_at,
            ended_at: None,
            timer_ms,
            status: SessionStatus::Running,
            intervals: vec![Interval::open_at(Status::Studying, started_at)],
            alerts: Vec::with_capacity(MAX_RECENT_ALERTS),
            total_alerts: 0,
            metrics: Metrics::fresh(),
            updated_at: started_at,
        }
    }

    /// Status of the open interval, or of the last closed one after the session ended.
    pub fn current_status(&self) -> Status {
        self.intervals
            .last()
            .map(|interval| interval.status)
            .unwrap_or(Status::Studying)
    }

    pub fn record_alert(&mut self, alert: Alert) {
        self.alerts.push(alert);
        if self.alerts.len() > MAX_RECENT_ALERTS {
            let excess = self.alerts.len() - MAX_RECENT_ALERTS;
            self.alerts.drain(..excess);
        }
        self.total_alerts += 1;
    }

    pub fn timer_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.timer_ms {
            Some(timer_ms) => (now - self.started_at).num_milliseconds() >= timer_ms as i64,
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}
