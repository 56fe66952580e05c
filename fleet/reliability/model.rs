use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds in one hour.
pub const MS_PER_HOUR: f64 = 3_600_000.0;
/// Milliseconds in one day.
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Maintenance order category derived from the `ZF0x` type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Project / improvement work.
    #[serde(rename = "ZF01")]
    Zf01,
    /// Corrective maintenance (a failure).
    #[serde(rename = "ZF02")]
    Zf02,
    /// Preventive maintenance.
    #[serde(rename = "ZF03")]
    Zf03,
    /// Type code missing or unrecognized.
    #[serde(rename = "unknown")]
    Unknown,
}

impl Category {
    /// Short code used in logs.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Zf01 => "ZF01",
            Self::Zf02 => "ZF02",
            Self::Zf03 => "ZF03",
            Self::Unknown => "unknown",
        }
    }
}

fn default_true() -> bool {
    true
}

/// A maintenance work order ("OS") already mapped to typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order number, unique per vehicle and window.
    pub id: String,
    /// Fleet identifier of the vehicle.
    pub vehicle_id: String,
    /// Raw type text carrying the `ZF0x` code.
    #[serde(default)]
    pub order_type: String,
    /// Opening time.
    pub start: DateTime<Utc>,
    /// Closing time; `None` while the order is still open.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Whether the order stopped the vehicle. Sources that omit the flag count as a stop.
    #[serde(default = "default_true")]
    pub has_stop: bool,
    /// Odometer reading at the start of the order.
    #[serde(default)]
    pub km_at_event: Option<f64>,
    /// Hour-meter reading at the start of the order.
    #[serde(default)]
    pub hr_at_event: Option<f64>,
    /// Free-text status (`Fechada`, `Em andamento`, ...).
    #[serde(default)]
    pub status: Option<String>,
}

impl Order {
    /// Creates an open order that stops the vehicle.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        vehicle_id: impl Into<String>,
        order_type: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            vehicle_id: vehicle_id.into(),
            order_type: order_type.into(),
            start,
            end: None,
            has_stop: true,
            km_at_event: None,
            hr_at_event: None,
            status: None,
        }
    }

    /// Sets the closing time.
    #[must_use]
    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Sets the stop flag.
    #[must_use]
    pub fn with_stop(mut self, has_stop: bool) -> Self {
        self.has_stop = has_stop;
        self
    }

    /// Sets the odometer reading.
    #[must_use]
    pub fn with_km(mut self, km: f64) -> Self {
        self.km_at_event = Some(km);
        self
    }

    /// Sets the hour-meter reading.
    #[must_use]
    pub fn with_hr(mut self, hr: f64) -> Self {
        self.hr_at_event = Some(hr);
        self
    }

    /// Sets the status text.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Closing time when it falls strictly after the opening time.
    ///
    /// An order closed at its own opening instant has no valid end: it is
    /// open for classification and runs until "now" when clamped.
    #[must_use]
    pub fn valid_end(&self) -> Option<DateTime<Utc>> {
        self.end.filter(|end| *end > self.start)
    }
}

/// One odometer / hour-meter snapshot from fuel and usage logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReading {
    /// Fleet identifier of the vehicle.
    pub vehicle_id: String,
    /// Time of the reading.
    pub timestamp: DateTime<Utc>,
    /// Cumulative odometer.
    #[serde(default)]
    pub km: Option<f64>,
    /// Cumulative hour-meter.
    #[serde(default)]
    pub hr: Option<f64>,
}

impl TelemetryReading {
    /// Creates a reading carrying both counters.
    #[must_use]
    pub fn new(vehicle_id: impl Into<String>, timestamp: DateTime<Utc>, km: f64, hr: f64) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            timestamp,
            km: Some(km),
            hr: Some(hr),
        }
    }

    /// Value of the requested counter.
    #[must_use]
    pub const fn value(&self, field: TelemetryField) -> Option<f64> {
        match field {
            TelemetryField::Km => self.km,
            TelemetryField::Hr => self.hr,
        }
    }
}

/// Cumulative counter carried by a telemetry reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryField {
    /// Odometer, kilometres.
    Km,
    /// Hour-meter, hours.
    Hr,
}

/// Half-open span `[start_ms, end_ms)` in epoch milliseconds; never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    start_ms: i64,
    end_ms: i64,
}

impl Interval {
    /// Builds an interval, rejecting empty or inverted spans.
    #[must_use]
    pub const fn new(start_ms: i64, end_ms: i64) -> Option<Self> {
        if end_ms > start_ms {
            Some(Self { start_ms, end_ms })
        } else {
            None
        }
    }

    /// Inclusive start.
    #[must_use]
    pub const fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// Exclusive end.
    #[must_use]
    pub const fn end_ms(&self) -> i64 {
        self.end_ms
    }

    /// Length in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Length in hours.
    #[must_use]
    pub fn hours(&self) -> f64 {
        self.duration_ms() as f64 / MS_PER_HOUR
    }
}

/// Reporting window `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReliabilityWindow {
    /// Window start.
    pub from: DateTime<Utc>,
    /// Window end.
    pub to: DateTime<Utc>,
}

impl ReliabilityWindow {
    /// Creates a window; `to <= from` is accepted and treated as degenerate.
    #[must_use]
    pub const fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Whether the window has no positive length.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.to <= self.from
    }

    /// Length in hours, 0 for degenerate windows.
    #[must_use]
    pub fn total_hours(&self) -> f64 {
        if self.is_degenerate() {
            0.0
        } else {
            (self.to - self.from).num_milliseconds() as f64 / MS_PER_HOUR
        }
    }
}

/// Alert severity for the break margin, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Not enough signal to judge.
    #[default]
    None,
    /// Comfortable margin.
    Success,
    /// Margin at or below the warning ratio.
    Warning,
    /// Margin at or below the error ratio.
    Error,
}

/// Which axis triggered a preventive recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreventiveReason {
    /// Odometer margin exhausted.
    #[serde(rename = "km")]
    Km,
    /// Hour-meter margin exhausted.
    #[serde(rename = "hr")]
    Hr,
    /// Both margins exhausted.
    #[serde(rename = "km_hr")]
    KmHr,
}

/// Projected next corrective failure for one vehicle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakPrediction {
    /// Typical distance between failures.
    pub km_break: Option<f64>,
    /// Typical hour-meter interval between failures.
    pub hr_break: Option<f64>,
    /// Odometer value at which the next failure is expected.
    pub next_break_km: Option<f64>,
    /// Hour-meter value at which the next failure is expected.
    pub next_break_hr: Option<f64>,
    /// Remaining kilometres.
    pub km_to_break: Option<f64>,
    /// Remaining hours.
    pub hr_to_break: Option<f64>,
    /// Remaining kilometres as a fraction of `km_break`.
    pub km_to_break_ratio: Option<f64>,
    /// Remaining hours as a fraction of `hr_break`.
    pub hr_to_break_ratio: Option<f64>,
    /// Alert on the odometer axis.
    pub km_alert_level: AlertLevel,
    /// Alert on the hour-meter axis.
    pub hr_alert_level: AlertLevel,
    /// Worst of the two axes.
    pub break_alert_level: AlertLevel,
    /// True when either axis is at error level.
    pub break_preventive_recommended: bool,
    /// Axis (or axes) that triggered the recommendation.
    pub break_preventive_reason: Option<PreventiveReason>,
    /// Days until `next_break_km` at the current usage rate.
    pub days_to_break_km: Option<f64>,
    /// Days until `next_break_hr` at the current usage rate.
    pub days_to_break_hr: Option<f64>,
    /// Expected calendar date of the odometer-based break.
    pub eta_break_date_km: Option<NaiveDate>,
    /// Expected calendar date of the hour-meter-based break.
    pub eta_break_date_hr: Option<NaiveDate>,
}

/// Current counters and usage rates attached from telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBundle {
    /// Latest odometer at or before "now".
    pub current_km: Option<f64>,
    /// Latest hour-meter at or before "now".
    pub current_hr: Option<f64>,
    /// Average kilometres per day over the lookback window.
    pub avg_km_per_day: Option<f64>,
    /// Average hours per day over the lookback window.
    pub avg_hr_per_day: Option<f64>,
    /// Timestamp of the newest reading used.
    pub last_telemetry_date: Option<DateTime<Utc>>,
}

/// Downtime and failure metrics for one vehicle over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilityMetrics {
    /// Corrective (ZF02) failures with positive downtime in the window.
    pub falhas: usize,
    /// Merged ZF02 downtime, hours.
    pub downtime_total: f64,
    /// Window length, hours.
    pub total_range_hours: f64,
    /// Window hours not spent in ZF02 downtime.
    pub operational_hours: f64,
    /// `operational_hours / total_range_hours`, within `[0, 1]`.
    pub availability: f64,
    /// Mean time to repair, hours.
    pub mttr: f64,
    /// Mean time between failures, hours.
    pub mtbf: f64,
    /// Project / improvement hours.
    #[serde(rename = "horasZF01")]
    pub horas_zf01: f64,
    /// Preventive hours.
    #[serde(rename = "horasZF03")]
    pub horas_zf03: f64,
    /// Corrective orders still open.
    #[serde(rename = "qtdAbertasZF02")]
    pub qtd_abertas_zf02: usize,
    /// Preventive orders still open.
    #[serde(rename = "qtdAbertasZF03")]
    pub qtd_abertas_zf03: usize,
}

impl ReliabilityMetrics {
    /// Metrics of a vehicle with no qualifying orders in a window of `total_range_hours`.
    #[must_use]
    pub fn idle(total_range_hours: f64) -> Self {
        let total = total_range_hours.max(0.0);
        Self {
            falhas: 0,
            downtime_total: 0.0,
            total_range_hours: total,
            operational_hours: total,
            availability: 1.0,
            mttr: 0.0,
            mtbf: 0.0,
            horas_zf01: 0.0,
            horas_zf03: 0.0,
            qtd_abertas_zf02: 0,
            qtd_abertas_zf03: 0,
        }
    }
}

/// Per-vehicle, per-window reliability aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilitySummary {
    /// Fleet identifier.
    pub vehicle_id: String,
    /// Downtime and failure metrics.
    #[serde(flatten)]
    pub metrics: ReliabilityMetrics,
    /// Current counters and usage rates.
    pub telemetry: TelemetryBundle,
    /// Next-break projection.
    pub break_prediction: BreakPrediction,
}

/// Epoch milliseconds of a UTC timestamp.
#[must_use]
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}
