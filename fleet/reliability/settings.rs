use std::{
    fs,
    path::{Path, PathBuf},
};

use fleet_logging::LogLevel;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ReliabilityError, ReliabilityResult},
    usage::DEFAULT_USAGE_WINDOW_DAYS,
};

/// Robust statistic used to turn inter-failure deltas into a typical interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BreakEstimator {
    /// Linear-interpolated percentile at fraction `p`.
    Percentile {
        /// Fraction in `[0, 1]`.
        p: f64,
    },
    /// Exponential moving average seeded with the oldest delta.
    Ema {
        /// Weight of each new delta, in `[0.01, 0.99]`.
        alpha: f64,
    },
}

impl BreakEstimator {
    /// Percentile estimator with `p` clamped to `[0, 1]`.
    #[must_use]
    pub fn percentile(p: f64) -> Self {
        Self::Percentile {
            p: clamp_or(p, 0.0, 1.0, DEFAULT_PERCENTILE),
        }
    }

    /// EMA estimator with `alpha` clamped to `[0.01, 0.99]`.
    #[must_use]
    pub fn ema(alpha: f64) -> Self {
        Self::Ema {
            alpha: clamp_or(alpha, 0.01, 0.99, DEFAULT_EMA_ALPHA),
        }
    }
}

impl Default for BreakEstimator {
    fn default() -> Self {
        Self::percentile(DEFAULT_PERCENTILE)
    }
}

/// Default percentile fraction.
pub const DEFAULT_PERCENTILE: f64 = 0.8;
/// Default EMA weight.
pub const DEFAULT_EMA_ALPHA: f64 = 0.3;

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Margin ratios at which the break alert escalates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Ratio at or below which the alert is `error`.
    pub error_ratio: f64,
    /// Ratio at or below which the alert is `warning`.
    pub warning_ratio: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_ratio: 0.05,
            warning_ratio: 0.10,
        }
    }
}

/// Where a next-break projection is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakAnchor {
    /// Current counter reading; the margin then always equals the interval.
    #[default]
    Current,
    /// Counter reading at the most recent failure.
    LastFailure,
}

/// Settings consumed by the pure computation functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilitySettings {
    /// Statistic applied to inter-failure deltas.
    pub estimator: BreakEstimator,
    /// Odometer deltas below this are ignored.
    pub min_delta_km: f64,
    /// Hour-meter deltas below this are ignored.
    pub min_delta_hr: f64,
    /// Keep only the most recent N failure events for prediction.
    pub history_limit: Option<usize>,
    /// Projection anchor.
    pub anchor: BreakAnchor,
    /// Alert escalation ratios.
    pub alerts: AlertThresholds,
    /// Usage-rate lookback in days.
    pub usage_window_days: u32,
}

impl Default for ReliabilitySettings {
    fn default() -> Self {
        Self {
            estimator: BreakEstimator::default(),
            min_delta_km: 0.0,
            min_delta_hr: 0.0,
            history_limit: None,
            anchor: BreakAnchor::default(),
            alerts: AlertThresholds::default(),
            usage_window_days: DEFAULT_USAGE_WINDOW_DAYS,
        }
    }
}

impl ReliabilitySettings {
    /// Stable text form used as part of cache keys.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Estimator mode as written in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorMode {
    /// Percentile estimator.
    #[default]
    Percentile,
    /// Exponential moving average.
    Ema,
}

/// `[estimator]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSection {
    /// Statistic to use.
    pub mode: EstimatorMode,
    /// Percentile fraction.
    pub p: f64,
    /// EMA weight.
    pub ema_alpha: f64,
    /// Minimum odometer delta.
    pub min_delta_km: f64,
    /// Minimum hour-meter delta.
    pub min_delta_hr: f64,
    /// Optional cap on failure events used.
    pub history_limit: Option<usize>,
    /// Projection anchor.
    pub anchor: BreakAnchor,
}

impl Default for EstimatorSection {
    fn default() -> Self {
        Self {
            mode: EstimatorMode::Percentile,
            p: DEFAULT_PERCENTILE,
            ema_alpha: DEFAULT_EMA_ALPHA,
            min_delta_km: 0.0,
            min_delta_hr: 0.0,
            history_limit: None,
            anchor: BreakAnchor::Current,
        }
    }
}

/// `[usage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSection {
    /// Lookback in days for usage rates.
    pub window_days: u32,
}

impl Default for UsageSection {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_USAGE_WINDOW_DAYS,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Whether summaries are memoized.
    pub enabled: bool,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 600,
        }
    }
}

/// `[clock]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSection {
    /// Operating timezone as a fixed offset from UTC, in hours.
    pub utc_offset_hours: f64,
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            utc_offset_hours: -3.0,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// JSON-lines log destination; disabled when absent.
    pub path: Option<PathBuf>,
    /// Lowest level written.
    pub min_level: LogLevel,
    /// JSON-lines destination for alert events; disabled when absent.
    pub alerts_path: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            path: None,
            min_level: LogLevel::Info,
            alerts_path: None,
        }
    }
}

/// Whole configuration document (`reliability.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Break estimator settings.
    pub estimator: EstimatorSection,
    /// Alert thresholds.
    pub alerts: AlertThresholds,
    /// Usage-rate settings.
    pub usage: UsageSection,
    /// Memoization settings.
    pub cache: CacheSection,
    /// Time source settings.
    pub clock: ClockSection,
    /// Log and alert sinks.
    pub logging: LoggingSection,
}

impl ReliabilityConfig {
    /// Loads and validates a TOML document. Relative sink paths resolve
    /// against the document's directory.
    pub fn load(path: impl AsRef<Path>) -> ReliabilityResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ReliabilityError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&raw).map_err(|err| match err {
            ReliabilityError::Parse { message, .. } => ReliabilityError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        let base = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        for sink in [&mut config.logging.path, &mut config.logging.alerts_path]
            .into_iter()
            .flatten()
        {
            if sink.is_relative() {
                *sink = base.join(&*sink);
            }
        }
        Ok(config)
    }

    /// Parses and validates a TOML document held in memory.
    pub fn parse(raw: &str) -> ReliabilityResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|err| ReliabilityError::Parse {
            path: PathBuf::from("<inline>"),
            message: err.to_string(),
        })?;
        config.validated()
    }

    fn validated(mut self) -> ReliabilityResult<Self> {
        let est = &mut self.estimator;
        est.p = clamp_or(est.p, 0.0, 1.0, DEFAULT_PERCENTILE);
        est.ema_alpha = clamp_or(est.ema_alpha, 0.01, 0.99, DEFAULT_EMA_ALPHA);
        if !(est.min_delta_km.is_finite() && est.min_delta_km >= 0.0)
            || !(est.min_delta_hr.is_finite() && est.min_delta_hr >= 0.0)
        {
            return Err(ReliabilityError::Config(
                "estimator.min_delta_km/min_delta_hr must be non-negative".into(),
            ));
        }
        if est.history_limit == Some(0) {
            est.history_limit = None;
        }
        let alerts = self.alerts;
        if !(alerts.error_ratio >= 0.0 && alerts.warning_ratio >= alerts.error_ratio) {
            return Err(ReliabilityError::Config(format!(
                "alerts.warning_ratio ({}) must be >= alerts.error_ratio ({}) >= 0",
                alerts.warning_ratio, alerts.error_ratio
            )));
        }
        if self.usage.window_days == 0 {
            return Err(ReliabilityError::Config(
                "usage.window_days must be positive".into(),
            ));
        }
        if !(-14.0..=14.0).contains(&self.clock.utc_offset_hours) {
            return Err(ReliabilityError::Config(format!(
                "clock.utc_offset_hours {} outside [-14, 14]",
                self.clock.utc_offset_hours
            )));
        }
        Ok(self)
    }

    /// Settings for the computation core.
    #[must_use]
    pub fn settings(&self) -> ReliabilitySettings {
        let est = &self.estimator;
        ReliabilitySettings {
            estimator: match est.mode {
                EstimatorMode::Percentile => BreakEstimator::percentile(est.p),
                EstimatorMode::Ema => BreakEstimator::ema(est.ema_alpha),
            },
            min_delta_km: est.min_delta_km,
            min_delta_hr: est.min_delta_hr,
            history_limit: est.history_limit,
            anchor: est.anchor,
            alerts: self.alerts,
            usage_window_days: self.usage.window_days,
        }
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> ReliabilityResult<String> {
        toml::to_string_pretty(self).map_err(|err| ReliabilityError::Config(err.to_string()))
    }
}
