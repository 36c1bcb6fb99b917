mod types;

pub use types::Metrics;

use chrono::{DateTime, Utc};

use crate::models::{Session, Status};

/// Derives totals from the interval history, counting the open interval up to `now`.
///
/// Always recomputed from scratch: no running counters survive between calls, so a
/// session restored after a crash reports the same numbers as one that never stopped.
pub fn compute(session: &Session, now: DateTime<Utc>) -> Metrics {
    let mut metrics = Metrics {
        total_alerts: session.total_alerts,
        ..Metrics::fresh()
    };

    for interval in &session.intervals {
        let duration = interval.duration_ms(now);
        match interval.status {
            Status::Studying => metrics.studying_ms += duration,
            Status::Distracted => metrics.distracted_ms += duration,
            Status::Away => metrics.away_ms += duration,
        }
    }

    metrics.focus_score = focus_score(metrics.studying_ms, metrics.accounted_ms());
    metrics
}

pub fn focus_score(studying_ms: u64, accounted_ms: u64) -> f64 {
    if accounted_ms == 0 {
        return 100.0;
    }
    let raw = studying_ms as f64 / accounted_ms as f64 * 100.0;
    ((raw * 10.0).round() / 10.0).clamp(0.0, 100.0)
}
