use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{AlertChannel, AlertLevel, SessionStatus};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_session_status(value: &str) -> Result<SessionStatus> {
    match value {
        "Running" => Ok(SessionStatus::Running),
        "Completed" => Ok(SessionStatus::Completed),
        "Terminated" => Ok(SessionStatus::Terminated),
        "Cleared" => Ok(SessionStatus::Cleared),
        "Interrupted" => Ok(SessionStatus::Interrupted),
        other => Err(anyhow!("unknown session status {other}")),
    }
}

pub fn channel_as_str(channel: AlertChannel) -> &'static str {
    match channel {
        AlertChannel::Voice => "voice",
        AlertChannel::Text => "text",
        AlertChannel::Both => "both",
        AlertChannel::None => "none",
    }
}

pub fn parse_channel(value: &str) -> Result<AlertChannel> {
    match value {
        "voice" => Ok(AlertChannel::Voice),
        "text" => Ok(AlertChannel::Text),
        "both" => Ok(AlertChannel::Both),
        "none" => Ok(AlertChannel::None),
        other => Err(anyhow!("unknown alert channel {other}")),
    }
}

pub fn level_as_str(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Warning => "warning",
    }
}

pub fn parse_level(value: &str) -> Result<AlertLevel> {
    match value {
        "warning" => Ok(AlertLevel::Warning),
        other => Err(anyhow!("unknown alert level {other}")),
    }
}

/// Fixed-width RFC 3339 (nanosecond precision, `Z` suffix): round-trips exactly and
/// stored timestamps compare correctly as text.
pub fn fmt_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
