use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

use crate::error::{ReliabilityError, ReliabilityResult};

/// Time source for "now" in the fleet's operating timezone.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Operating timezone.
    fn offset(&self) -> FixedOffset;

    /// Calendar date of `instant` in the operating timezone.
    fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset()).date_naive()
    }
}

/// Builds a fixed offset from fractional hours (`-3.0`, `5.5`).
pub fn offset_from_hours(hours: f64) -> ReliabilityResult<FixedOffset> {
    let seconds = (hours * 3_600.0).round();
    if !seconds.is_finite() || seconds.abs() >= 86_400.0 {
        return Err(ReliabilityError::Config(format!("utc offset {hours}h out of range")));
    }
    FixedOffset::east_opt(seconds as i32)
        .ok_or_else(|| ReliabilityError::Config(format!("utc offset {hours}h out of range")))
}

/// Wall clock in a fixed offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Wall clock reporting dates in `offset`.
    #[must_use]
    pub const fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

/// Brasília time: UTC−3, no daylight saving since 2019.
const DEFAULT_OFFSET_WEST_SECS: i32 = 3 * 3_600;

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            offset: FixedOffset::west_opt(DEFAULT_OFFSET_WEST_SECS).unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Frozen clock for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: DateTime<Utc>,
    offset: FixedOffset,
}

impl FixedClock {
    /// Clock stuck at `instant`, reporting dates in `offset`.
    #[must_use]
    pub const fn new(instant: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self { instant, offset }
    }

    /// Clock stuck at `instant` in UTC.
    #[must_use]
    pub fn utc(instant: DateTime<Utc>) -> Self {
        Self::new(instant, Utc.fix())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}
