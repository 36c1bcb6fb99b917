use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AlertLevel {
    #[default]
    Warning,
}

/// Where an alert is delivered. Chosen per user in the engine settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AlertChannel {
    Voice,
    #[default]
    Text,
    Both,
    None,
}

impl AlertChannel {
    pub fn speaks(&self) -> bool {
        matches!(self, AlertChannel::Voice | AlertChannel::Both)
    }

    pub fn writes(&self) -> bool {
        matches!(self, AlertChannel::Text | AlertChannel::Both)
    }
}

/// A nagging message raised while the user is away. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub channel: AlertChannel,
}
