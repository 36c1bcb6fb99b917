use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{Alert, AlertChannel, AlertLevel, Status};

/// Rotated through in order, wrapping around.
pub const NAG_MESSAGES: &[&str] = &[
    "You've been away for a while. Time to get back to studying!",
    "Your desk misses you. Come back and pick up where you left off.",
    "Still away? Your session is ticking, let's refocus.",
    "Break's over! Sit back down and keep going.",
];

#[derive(Debug, Clone)]
pub struct AlertPolicyConfig {
    pub alert_interval: Duration,
    pub max_warnings: u32,
    pub channel: AlertChannel,
}

impl Default for AlertPolicyConfig {
    fn default() -> Self {
        Self {
            alert_interval: Duration::seconds(60),
            max_warnings: 3,
            channel: AlertChannel::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum PolicyState {
    Idle,
    AwayTracking { since: DateTime<Utc>, warnings: u32 },
    /// Escalation fired; the session is being terminated.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    None,
    Alert(Alert),
    /// The last allowed alert was just raised; the session must end.
    Terminate(Alert),
}

#[derive(Debug, Clone)]
pub struct AlertPolicy {
    config: AlertPolicyConfig,
    state: PolicyState,
    last_alert_at: Option<DateTime<Utc>>,
    message_index: usize,
}

impl AlertPolicy {
    pub fn new(config: AlertPolicyConfig) -> Self {
        Self {
            config,
            state: PolicyState::Idle,
            last_alert_at: None,
            message_index: 0,
        }
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    pub fn on_status_change(&mut self, status: Status, now: DateTime<Utc>) {
        match (self.state, status) {
            (PolicyState::Exhausted, _) => {}
            (PolicyState::Idle, Status::Away) => {
                self.state = PolicyState::AwayTracking {
                    since: now,
                    warnings: 0,
                };
            }
            (PolicyState::AwayTracking { .. }, Status::Away) => {}
            (_, _) => self.state = PolicyState::Idle,
        }
    }

    pub fn on_tick(&mut self, status: Status, now: DateTime<Utc>) -> AlertDecision {
        if status != Status::Away {
            self.on_status_change(status, now);
            return AlertDecision::None;
        }
        if self.state == PolicyState::Idle {
            // Restored sessions can resume mid-absence without a change event.
            self.on_status_change(status, now);
        }

        let PolicyState::AwayTracking { since, warnings } = self.state else {
            return AlertDecision::None;
        };

        if now - since < self.config.alert_interval || !self.cooldown_elapsed(now) {
            return AlertDecision::None;
        }

        let alert = self.next_alert(now);
        let warnings = warnings + 1;
        self.last_alert_at = Some(now);

        if warnings >= self.config.max_warnings.max(1) {
            self.state = PolicyState::Exhausted;
            AlertDecision::Terminate(alert)
        } else {
            self.state = PolicyState::AwayTracking { since, warnings };
            AlertDecision::Alert(alert)
        }
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.last_alert_at
            .map(|last| now - last >= self.config.alert_interval)
            .unwrap_or(true)
    }

    fn next_alert(&mut self, now: DateTime<Utc>) -> Alert {
        let message = NAG_MESSAGES[self.message_index % NAG_MESSAGES.len()];
        self.message_index = (self.message_index + 1) % NAG_MESSAGES.len();
        Alert {
            message: message.to_string(),
            timestamp: now,
            level: AlertLevel::Warning,
            channel: self.config.channel,
        }
    }
}
