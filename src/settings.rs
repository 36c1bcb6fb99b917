use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::alerts::AlertPolicyConfig;
use crate::models::AlertChannel;

/// Tunables of the presence engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub away_threshold_ticks: u32,
    pub return_threshold_ticks: u32,
    pub alert_interval_seconds: u64,
    pub max_warnings: u32,
    pub alert_channel: AlertChannel,
    pub sample_interval_ms: u64,
    pub sample_timeout_ms: u64,
    pub checkpoint_interval_seconds: u64,
    /// How old an unclosed session may be and still be resumed on login.
    pub restore_window_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            away_threshold_ticks: 8,
            return_threshold_ticks: 3,
            alert_interval_seconds: 60,
            max_warnings: 3,
            alert_channel: AlertChannel::Text,
            sample_interval_ms: 500,
            sample_timeout_ms: 2_000,
            checkpoint_interval_seconds: 30,
            restore_window_seconds: 2 * 60 * 60,
        }
    }
}

impl EngineSettings {
    pub fn alert_policy(&self) -> AlertPolicyConfig {
        AlertPolicyConfig {
            alert_interval: ChronoDuration::seconds(self.alert_interval_seconds as i64),
            max_warnings: self.max_warnings,
            channel: self.alert_channel,
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(10))
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms.max(1))
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_seconds.max(1))
    }

    pub fn restore_window(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.restore_window_seconds as i64)
    }

    /// `STUDYWATCH_DEBUG=1` checkpoints every second so persistence can be watched live.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("STUDYWATCH_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.checkpoint_interval_seconds = 1;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    engine: EngineSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn engine(&self) -> EngineSettings {
        match self.data.read() {
            Ok(guard) => guard.engine.clone(),
            Err(poisoned) => poisoned.into_inner().engine.clone(),
        }
    }

    pub fn update_engine(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.engine = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
