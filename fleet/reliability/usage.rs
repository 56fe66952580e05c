use chrono::{DateTime, Duration, Utc};

use crate::model::{Order, TelemetryBundle, TelemetryField, TelemetryReading, MS_PER_DAY};

/// Default lookback for usage-rate estimation.
pub const DEFAULT_USAGE_WINDOW_DAYS: u32 = 30;

/// Returns the readings sorted by timestamp (stable for equal timestamps).
#[must_use]
pub fn sorted_readings(readings: &[TelemetryReading]) -> Vec<TelemetryReading> {
    let mut sorted = readings.to_vec();
    sorted.sort_by_key(|reading| reading.timestamp);
    sorted
}

/// Snapshot closest to `target`: the last one at or before it, otherwise the
/// earliest one after it. `readings` must be sorted.
#[must_use]
pub fn nearest_snapshot(
    readings: &[TelemetryReading],
    target: DateTime<Utc>,
) -> Option<&TelemetryReading> {
    let split = readings.partition_point(|reading| reading.timestamp <= target);
    if split > 0 {
        readings.get(split - 1)
    } else {
        readings.first()
    }
}

/// Last reading at or before `limit`, or the last reading overall when every
/// reading is newer. `readings` must be sorted.
#[must_use]
pub fn latest_before(
    readings: &[TelemetryReading],
    limit: DateTime<Utc>,
) -> Option<&TelemetryReading> {
    let split = readings.partition_point(|reading| reading.timestamp <= limit);
    if split > 0 {
        readings.get(split - 1)
    } else {
        readings.last()
    }
}

/// Average daily growth of `field` over `[ref_time - window_days, ref_time]`.
///
/// Points whose value does not exceed the running maximum are skipped, so an
/// odometer swap or a typo never yields a negative rate. Needs two increasing
/// points spanning a positive time.
#[must_use]
pub fn windowed_avg_per_day(
    readings: &[TelemetryReading],
    field: TelemetryField,
    ref_time: DateTime<Utc>,
    window_days: u32,
) -> Option<f64> {
    let lower = ref_time - Duration::days(i64::from(window_days));
    let mut increasing: Vec<(DateTime<Utc>, f64)> = Vec::new();
    for reading in readings
        .iter()
        .filter(|reading| reading.timestamp >= lower && reading.timestamp <= ref_time)
    {
        let Some(value) = reading.value(field).filter(|v| v.is_finite()) else {
            continue;
        };
        if increasing.last().map_or(true, |(_, prev)| value > *prev) {
            increasing.push((reading.timestamp, value));
        }
    }
    let (first, last) = (increasing.first()?, increasing.last()?);
    let delta = last.1 - first.1;
    let elapsed_days = (last.0 - first.0).num_milliseconds() as f64 / MS_PER_DAY;
    if increasing.len() < 2 || delta <= 0.0 || elapsed_days <= 0.0 {
        return None;
    }
    Some(delta / elapsed_days)
}

/// Readings that carry `field`, preserving order.
fn carrying(readings: &[TelemetryReading], field: TelemetryField) -> Vec<TelemetryReading> {
    readings
        .iter()
        .filter(|reading| reading.value(field).is_some())
        .cloned()
        .collect()
}

/// Fills missing `km_at_event` / `hr_at_event` from the snapshot nearest to
/// each order's start. `readings` must be sorted.
pub fn backfill_event_readings(orders: &mut [Order], readings: &[TelemetryReading]) {
    let with_km = carrying(readings, TelemetryField::Km);
    let with_hr = carrying(readings, TelemetryField::Hr);
    for order in orders.iter_mut() {
        if order.km_at_event.is_none() {
            order.km_at_event = nearest_snapshot(&with_km, order.start).and_then(|r| r.km);
        }
        if order.hr_at_event.is_none() {
            order.hr_at_event = nearest_snapshot(&with_hr, order.start).and_then(|r| r.hr);
        }
    }
}

/// Current counters and usage rates for one vehicle. `readings` must be sorted.
///
/// Current values come from the newest reading at or before `now`; rates are
/// anchored on that reading's timestamp so a vehicle whose logs lag a few days
/// still gets a rate.
#[must_use]
pub fn telemetry_bundle(
    readings: &[TelemetryReading],
    now: DateTime<Utc>,
    window_days: u32,
) -> TelemetryBundle {
    let with_km = carrying(readings, TelemetryField::Km);
    let with_hr = carrying(readings, TelemetryField::Hr);
    let km_snapshot = latest_before(&with_km, now);
    let hr_snapshot = latest_before(&with_hr, now);

    let avg_km_per_day = km_snapshot.and_then(|snap| {
        windowed_avg_per_day(&with_km, TelemetryField::Km, snap.timestamp, window_days)
    });
    let avg_hr_per_day = hr_snapshot.and_then(|snap| {
        windowed_avg_per_day(&with_hr, TelemetryField::Hr, snap.timestamp, window_days)
    });

    TelemetryBundle {
        current_km: km_snapshot.and_then(|snap| snap.km),
        current_hr: hr_snapshot.and_then(|snap| snap.hr),
        avg_km_per_day,
        avg_hr_per_day,
        last_telemetry_date: latest_before(readings, now).map(|snap| snap.timestamp),
    }
}
