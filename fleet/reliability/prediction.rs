use std::collections::HashSet;

use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::debug;

use crate::{
    classifier::{classify, counts_for_downtime},
    model::{AlertLevel, BreakPrediction, Category, Order, PreventiveReason, TelemetryBundle},
    settings::{AlertThresholds, BreakAnchor, BreakEstimator, ReliabilitySettings},
};

/// A corrective failure with the counters observed when it opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureEvent {
    /// Opening time.
    pub start: DateTime<Utc>,
    /// Odometer at the failure.
    pub km: Option<f64>,
    /// Hour-meter at the failure.
    pub hr: Option<f64>,
}

/// Chronological corrective failures eligible for prediction.
///
/// Only ZF02 orders that count for downtime qualify; repeated ids are dropped
/// and `history_limit` keeps the most recent events.
#[must_use]
pub fn failure_events(orders: &[Order], history_limit: Option<usize>) -> Vec<FailureEvent> {
    let mut seen = HashSet::new();
    let mut events: Vec<FailureEvent> = orders
        .iter()
        .filter(|order| classify(order) == Category::Zf02 && counts_for_downtime(order))
        .filter(|order| seen.insert(order.id.as_str()))
        .map(|order| FailureEvent {
            start: order.start,
            km: order.km_at_event.filter(|v| v.is_finite()),
            hr: order.hr_at_event.filter(|v| v.is_finite()),
        })
        .collect();
    events.sort_by_key(|event| event.start);
    if let Some(limit) = history_limit {
        let excess = events.len().saturating_sub(limit);
        events.drain(..excess);
    }
    events
}

/// Positive deltas between successive readings, skipping resets and deltas
/// below `min_delta`. Each pair is compared independently.
#[must_use]
pub fn inter_failure_deltas(values: &[f64], min_delta: f64) -> Vec<f64> {
    values
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|delta| *delta > 0.0 && *delta >= min_delta)
        .collect()
}

/// Linear-interpolated percentile at fraction `p` of unsorted `values`.
///
/// A single value is returned as is; `p = 0` gives the minimum, `p = 1` the maximum.
#[must_use]
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    match sorted.len() {
        0 => None,
        1 => sorted.first().copied(),
        n => {
            let idx = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = idx.floor() as usize;
            let hi = idx.ceil() as usize;
            let (low, high) = (sorted[lo], sorted[hi]);
            Some((high - low).mul_add(idx - lo as f64, low))
        }
    }
}

/// Exponential moving average seeded with the first value, in input order.
#[must_use]
pub fn ema(values: &[f64], alpha: f64) -> Option<f64> {
    let (first, rest) = values.split_first()?;
    Some(
        rest.iter()
            .fold(*first, |acc, v| alpha.mul_add(*v, (1.0 - alpha) * acc)),
    )
}

impl BreakEstimator {
    /// Typical interval for the chronological `deltas`, or `None` without any.
    #[must_use]
    pub fn robust_interval(&self, deltas: &[f64]) -> Option<f64> {
        match *self {
            Self::Percentile { p } => percentile(deltas, p),
            Self::Ema { alpha } => ema(deltas, alpha),
        }
    }
}

/// Classifies a remaining-margin ratio.
#[must_use]
pub fn alert_level(ratio: Option<f64>, thresholds: &AlertThresholds) -> AlertLevel {
    match ratio {
        Some(r) if r.is_finite() && r <= thresholds.error_ratio => AlertLevel::Error,
        Some(r) if r.is_finite() && r <= thresholds.warning_ratio => AlertLevel::Warning,
        Some(r) if r.is_finite() => AlertLevel::Success,
        _ => AlertLevel::None,
    }
}

/// Projection along one counter axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisProjection {
    /// Typical inter-failure interval.
    pub interval: Option<f64>,
    /// Counter value of the expected next failure.
    pub next_break: Option<f64>,
    /// Remaining margin.
    pub to_break: Option<f64>,
    /// Remaining margin over the interval.
    pub ratio: Option<f64>,
    /// Alert for this axis.
    pub level: AlertLevel,
    /// Days left at the current usage rate.
    pub days_to_break: Option<f64>,
    /// Expected calendar date.
    pub eta: Option<NaiveDate>,
}

/// Inputs for one counter axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisInput<'a> {
    /// Counter values at each failure, chronological.
    pub readings: &'a [f64],
    /// Minimum accepted delta.
    pub min_delta: f64,
    /// Current counter value.
    pub current: Option<f64>,
    /// Average growth per day.
    pub rate_per_day: Option<f64>,
}

/// Projects the next failure along one axis.
///
/// From the current reading the margin is the interval itself, so it is
/// reported even without telemetry; `next_break` always needs a current value.
#[must_use]
pub fn project_axis(
    input: AxisInput<'_>,
    settings: &ReliabilitySettings,
    today: NaiveDate,
) -> AxisProjection {
    let deltas = inter_failure_deltas(input.readings, input.min_delta);
    let Some(interval) = settings.estimator.robust_interval(&deltas) else {
        return AxisProjection::default();
    };
    let (next_break, to_break) = match settings.anchor {
        BreakAnchor::Current => (input.current.map(|current| current + interval), Some(interval)),
        BreakAnchor::LastFailure => match (input.readings.last(), input.current) {
            (Some(last), Some(current)) => {
                let next_break = last + interval;
                (Some(next_break), Some((next_break - current).max(0.0)))
            }
            _ => (None, None),
        },
    };
    let ratio = to_break
        .filter(|_| interval > 0.0)
        .map(|margin| margin / interval);
    let days_to_break = to_break.and_then(|margin| {
        input
            .rate_per_day
            .filter(|rate| *rate > 0.0)
            .map(|rate| margin / rate)
    });
    let eta = days_to_break.and_then(|days| eta_date(today, days));

    AxisProjection {
        interval: Some(interval),
        next_break,
        to_break,
        ratio,
        level: alert_level(ratio, &settings.alerts),
        days_to_break,
        eta,
    }
}

/// `today + ceil(days)`; `None` when the result leaves the calendar range.
#[must_use]
pub fn eta_date(today: NaiveDate, days: f64) -> Option<NaiveDate> {
    if !days.is_finite() || days < 0.0 {
        return None;
    }
    let whole = days.ceil();
    if whole > f64::from(u32::MAX) {
        return None;
    }
    today.checked_add_days(Days::new(whole as u64))
}

/// Predicts the next corrective failure from the vehicle's failure history.
///
/// Fewer than two usable failures on an axis leaves that axis empty; nothing
/// is ever extrapolated from a single event.
#[must_use]
pub fn predict_break(
    events: &[FailureEvent],
    telemetry: &TelemetryBundle,
    settings: &ReliabilitySettings,
    today: NaiveDate,
) -> BreakPrediction {
    let km_values: Vec<f64> = events.iter().filter_map(|event| event.km).collect();
    let hr_values: Vec<f64> = events.iter().filter_map(|event| event.hr).collect();

    let km = project_axis(
        AxisInput {
            readings: &km_values,
            min_delta: settings.min_delta_km,
            current: telemetry.current_km,
            rate_per_day: telemetry.avg_km_per_day,
        },
        settings,
        today,
    );
    let hr = project_axis(
        AxisInput {
            readings: &hr_values,
            min_delta: settings.min_delta_hr,
            current: telemetry.current_hr,
            rate_per_day: telemetry.avg_hr_per_day,
        },
        settings,
        today,
    );
    if km.interval.is_none() && hr.interval.is_none() {
        debug!(events = events.len(), "insufficient failure history for break prediction");
    }

    let break_preventive_reason = match (km.level, hr.level) {
        (AlertLevel::Error, AlertLevel::Error) => Some(PreventiveReason::KmHr),
        (AlertLevel::Error, _) => Some(PreventiveReason::Km),
        (_, AlertLevel::Error) => Some(PreventiveReason::Hr),
        _ => None,
    };

    BreakPrediction {
        km_break: km.interval,
        hr_break: hr.interval,
        next_break_km: km.next_break,
        next_break_hr: hr.next_break,
        km_to_break: km.to_break,
        hr_to_break: hr.to_break,
        km_to_break_ratio: km.ratio,
        hr_to_break_ratio: hr.ratio,
        km_alert_level: km.level,
        hr_alert_level: hr.level,
        break_alert_level: km.level.max(hr.level),
        break_preventive_recommended: break_preventive_reason.is_some(),
        break_preventive_reason,
        days_to_break_km: km.days_to_break,
        days_to_break_hr: hr.days_to_break,
        eta_break_date_km: km.eta,
        eta_break_date_hr: hr.eta,
    }
}
