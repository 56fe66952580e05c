use chrono::{DateTime, Utc};

use crate::model::{to_millis, Interval, MS_PER_HOUR};

/// Clamps an event `[start, end)` to the reporting range.
///
/// A missing end, or one that does not come after `start`, means the event is
/// still running and is closed at `min(range_to, now)`. Events wholly outside
/// the range, and spans that collapse to zero length, yield `None`.
#[must_use]
pub fn clamp_to_range(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    range_from: DateTime<Utc>,
    range_to: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<Interval> {
    clamp_millis(
        to_millis(start),
        end.map(to_millis),
        to_millis(range_from),
        to_millis(range_to),
        to_millis(now),
    )
}

/// Millisecond form of [`clamp_to_range`].
#[must_use]
pub fn clamp_millis(
    start_ms: i64,
    end_ms: Option<i64>,
    range_from_ms: i64,
    range_to_ms: i64,
    now_ms: i64,
) -> Option<Interval> {
    if range_to_ms <= range_from_ms {
        return None;
    }
    let end_ms = match end_ms {
        Some(end) if end > start_ms => end,
        _ => range_to_ms.min(now_ms),
    };
    if end_ms <= range_from_ms || start_ms >= range_to_ms {
        return None;
    }
    Interval::new(start_ms.max(range_from_ms), end_ms.min(range_to_ms))
}

/// Merges overlapping or touching intervals into a start-ordered disjoint list.
#[must_use]
pub fn merge_overlapping(intervals: &[Interval]) -> Vec<Interval> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|iv| (iv.start_ms(), iv.end_ms()));

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for iv in sorted {
        match merged.last_mut() {
            Some(last) if iv.start_ms() <= last.end_ms() => {
                if iv.end_ms() > last.end_ms() {
                    if let Some(grown) = Interval::new(last.start_ms(), iv.end_ms()) {
                        *last = grown;
                    }
                }
            }
            _ => merged.push(iv),
        }
    }
    merged
}

/// Total length in hours.
#[must_use]
pub fn sum_hours(intervals: &[Interval]) -> f64 {
    let total_ms: i64 = intervals.iter().map(Interval::duration_ms).sum();
    total_ms as f64 / MS_PER_HOUR
}

/// Non-double-counted hours of one accounting bucket.
#[must_use]
pub fn union_hours(intervals: &[Interval]) -> f64 {
    sum_hours(&merge_overlapping(intervals))
}
