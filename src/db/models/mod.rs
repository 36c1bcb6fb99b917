//! Row types that only exist in storage. Session data itself uses `crate::models`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user totals, bumped once for every finalized session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub user_id: String,
    pub total_sessions: u64,
    pub total_studying_ms: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_sessions: u64,
    pub total_studying_ms: u64,
    pub updated_at: DateTime<Utc>,
}
