//! Presence sampling: the classifier seam and the per-session loop that polls it.

pub mod controller;
pub mod loop_worker;
pub mod source;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use controller::SamplingController;
pub use source::{FlagFileFactory, FlagFileSource, PresenceSource, PresenceSourceFactory, ScriptedSource};

/// One raw reading from the classifier. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSample {
    pub detected: bool,
    pub timestamp: DateTime<Utc>,
}
