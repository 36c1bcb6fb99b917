use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alerts::{policy::PolicyState, AlertDecision, AlertPolicy};
use crate::metrics::{self, Metrics};
use crate::models::{Alert, EndReason, Interval, Session, Status};
use crate::presence::SamplingController;
use crate::settings::EngineSettings;
use crate::tracking::{intervals, Debouncer};

/// Read-only view of a live session, cloned out of the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub timer_ms: Option<u64>,
    pub remaining_ms: Option<u64>,
    pub status: Status,
    pub metrics: Metrics,
    pub intervals: Vec<Interval>,
    pub recent_alerts: Vec<Alert>,
    pub alert_state: PolicyState,
}

/// What one tick did to a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub status: Status,
    pub status_changed: bool,
    pub alert: Option<Alert>,
    /// Set when this tick ended the session.
    pub ended: Option<EndReason>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    Started {
        user_id: String,
        session_id: String,
        resumed: bool,
    },
    StatusChanged {
        user_id: String,
        session_id: String,
        status: Status,
        at: DateTime<Utc>,
    },
    Alert {
        user_id: String,
        session_id: String,
        alert: Alert,
    },
    Checkpointed {
        user_id: String,
        session_id: String,
        at: DateTime<Utc>,
    },
    Ended {
        user_id: String,
        session_id: String,
        reason: EndReason,
        metrics: Metrics,
    },
}

/// Registry entry: the session record plus the per-session engine state.
pub(crate) struct ActiveSession {
    pub session: Session,
    pub debouncer: Debouncer,
    pub policy: AlertPolicy,
    pub sampling: Option<SamplingController>,
    last_tick_at: DateTime<Utc>,
}

impl ActiveSession {
    pub fn new(session: Session, settings: &EngineSettings) -> Self {
        let last_tick_at = session
            .intervals
            .last()
            .map(|interval| interval.start.max(session.updated_at))
            .unwrap_or(session.started_at);

        Self {
            session,
            debouncer: Debouncer::new(settings.return_threshold_ticks, settings.away_threshold_ticks),
            policy: AlertPolicy::new(settings.alert_policy()),
            sampling: None,
            last_tick_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Never lets time run backwards inside one session.
    pub fn clamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now.max(self.last_tick_at);
        self.last_tick_at = now;
        now
    }

    /// Debouncer, then interval log and alert policy, then the study timer.
    pub fn advance(&mut self, detected: bool, now: DateTime<Utc>) -> TickOutcome {
        let now = self.clamp(now);

        let mut status_changed = false;
        if let Some(confirmed) = self.debouncer.observe(detected) {
            if intervals::on_confirmed_status(&mut self.session.intervals, confirmed, now) {
                status_changed = true;
                self.policy.on_status_change(confirmed, now);
            }
        }

        let status = self.session.current_status();
        let mut ended = None;
        let alert = match self.policy.on_tick(status, now) {
            AlertDecision::None => None,
            AlertDecision::Alert(alert) => Some(alert),
            AlertDecision::Terminate(alert) => {
                ended = Some(EndReason::TooMuchTimeAway);
                Some(alert)
            }
        };
        if let Some(alert) = &alert {
            self.session.record_alert(alert.clone());
        }

        if ended.is_none() && self.session.timer_elapsed(now) {
            ended = Some(EndReason::TimerElapsed);
        }

        TickOutcome {
            status,
            status_changed,
            alert,
            ended,
        }
    }

    /// Session record with metrics brought up to `now`, ready for a checkpoint.
    pub fn checkpoint_record(&mut self, now: DateTime<Utc>) -> Session {
        let now = now.max(self.last_tick_at);
        self.session.metrics = metrics::compute(&self.session, now);
        self.session.updated_at = now;
        self.session.clone()
    }

    /// Closes the open interval and stamps the end. Safe to call twice.
    pub fn close(&mut self, reason: EndReason, now: DateTime<Utc>) -> Metrics {
        let now = self.clamp(now);
        intervals::close_open(&mut self.session.intervals, now);
        let metrics = metrics::compute(&self.session, now);

        self.session.ended_at.get_or_insert(now);
        self.session.status = reason.session_status();
        self.session.metrics = metrics.clone();
        self.session.updated_at = now;
        metrics
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> LiveSnapshot {
        let now = now.max(self.last_tick_at);
        let remaining_ms = self.session.timer_ms.map(|timer_ms| {
            let elapsed = (now - self.session.started_at).num_milliseconds().max(0) as u64;
            timer_ms.saturating_sub(elapsed)
        });

        LiveSnapshot {
            session_id: self.session.id.clone(),
            user_id: self.session.user_id.clone(),
            started_at: self.session.started_at,
            timer_ms: self.session.timer_ms,
            remaining_ms,
            status: self.session.current_status(),
            metrics: metrics::compute(&self.session, now),
            intervals: self.session.intervals.clone(),
            recent_alerts: self.session.alerts.clone(),
            alert_state: self.policy.state(),
        }
    }
}
