use serde::{Deserialize, Serialize};

use crate::models::Status;

/// Run-length filter over raw per-tick detections.
///
/// A status is only confirmed after a run of consistent readings. Returning is
/// meant to be quicker than leaving, so the two thresholds are separate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Debouncer {
    return_threshold: u32,
    away_threshold: u32,
    consecutive_present: u32,
    consecutive_absent: u32,
}

impl Debouncer {
    pub fn new(return_threshold: u32, away_threshold: u32) -> Self {
        Self {
            return_threshold: return_threshold.max(1),
            away_threshold: away_threshold.max(1),
            consecutive_present: 0,
            consecutive_absent: 0,
        }
    }

    /// Feeds one reading. `None` means nothing is confirmed yet and the caller keeps
    /// the previous status.
    pub fn observe(&mut self, detected: bool) -> Option<Status> {
        if detected {
            self.consecutive_present = self.consecutive_present.saturating_add(1);
            self.consecutive_absent = 0;
            (self.consecutive_present >= self.return_threshold).then_some(Status::Studying)
        } else {
            self.consecutive_absent = self.consecutive_absent.saturating_add(1);
            self.consecutive_present = 0;
            (self.consecutive_absent >= self.away_threshold).then_some(Status::Away)
        }
    }

    pub fn consecutive_present(&self) -> u32 {
        self.consecutive_present
    }

    pub fn consecutive_absent(&self) -> u32 {
        self.consecutive_absent
    }
}
