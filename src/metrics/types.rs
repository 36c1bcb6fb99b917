use serde::{Deserialize, Serialize};

/// Time-in-state totals for one session. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub studying_ms: u64,
    pub distracted_ms: u64,
    pub away_ms: u64,
    pub total_alerts: u64,
    /// Share of accounted time spent studying, 0.0 to 100.0 with one decimal.
    pub focus_score: f64,
}

impl Metrics {
    /// Metrics of a session with no elapsed time.
    pub fn fresh() -> Self {
        Self {
            studying_ms: 0,
            distracted_ms: 0,
            away_ms: 0,
            total_alerts: 0,
            focus_score: 100.0,
        }
    }

    pub fn accounted_ms(&self) -> u64 {
        self.studying_ms + self.distracted_ms + self.away_ms
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::fresh()
    }
}
