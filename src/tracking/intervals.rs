use chrono::{DateTime, Utc};

use crate::models::{Interval, Status};

/// Applies a confirmed status at `now`.
///
/// Returns `false` when the open interval already carries `status`. Otherwise the
/// open interval is closed at `now` and a new open one is appended. A timestamp older
/// than the open interval's start is clamped to that start.
pub fn on_confirmed_status(intervals: &mut Vec<Interval>, status: Status, now: DateTime<Utc>) -> bool {
    let at = match intervals.last_mut() {
        Some(last) if last.is_open() => {
            if last.status == status {
                return false;
            }
            let at = now.max(last.start);
            last.end = Some(at);
            at
        }
        Some(last) => now.max(last.end.unwrap_or(last.start)),
        None => now,
    };

    intervals.push(Interval::open_at(status, at));
    true
}

/// Closes the trailing interval if it is still open. Safe to call repeatedly.
pub fn close_open(intervals: &mut [Interval], now: DateTime<Utc>) {
    if let Some(last) = intervals.last_mut() {
        if last.is_open() {
            last.end = Some(now.max(last.start));
        }
    }
}

pub fn open_status(intervals: &[Interval]) -> Option<Status> {
    intervals
        .last()
        .filter(|interval| interval.is_open())
        .map(|interval| interval.status)
}

/// Checks ordering and the single-open-interval rule.
pub fn is_well_formed(intervals: &[Interval]) -> bool {
    let open_count = intervals.iter().filter(|interval| interval.is_open()).count();
    if open_count > 1 {
        return false;
    }
    if open_count == 1 && !intervals.last().map(Interval::is_open).unwrap_or(false) {
        return false;
    }

    let closed_ok = intervals
        .iter()
        .all(|interval| interval.end.map(|end| end >= interval.start).unwrap_or(true));
    let ordered = intervals.windows(2).all(|pair| pair[0].start <= pair[1].start);
    closed_ok && ordered
}
