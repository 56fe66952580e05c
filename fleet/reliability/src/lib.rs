#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Frota Reliability Engine – non-double-counted downtime, MTBF/MTTR and
//! availability per vehicle, plus next-break projection from failure history
//! and telemetry.

/// Orders, telemetry snapshots and summary records.
#[path = "../model.rs"]
pub mod model;

/// Interval clamping and union.
#[path = "../interval.rs"]
pub mod interval;

/// Order type and status classification.
#[path = "../classifier.rs"]
pub mod classifier;

/// Window metrics.
#[path = "../metrics.rs"]
pub mod metrics;

/// Telemetry attachment and usage rates.
#[path = "../usage.rs"]
pub mod usage;

/// Break prediction.
#[path = "../prediction.rs"]
pub mod prediction;

/// Per-vehicle and fleet aggregation.
#[path = "../aggregator.rs"]
pub mod aggregator;

/// Settings and TOML configuration.
#[path = "../settings.rs"]
pub mod settings;

/// Time sources.
#[path = "../clock.rs"]
pub mod clock;

/// TTL memo of summaries.
#[path = "../cache.rs"]
pub mod cache;

/// Error types.
#[path = "../error.rs"]
pub mod error;

/// Telemetry for the reliability engine.
#[path = "../helper.rs"]
pub mod helper;

/// Async engine entry point.
#[path = "../main.rs"]
pub mod runtime;

pub use aggregator::{build_summaries, summarize_vehicle, OrdersByVehicle, TelemetryByVehicle};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ReliabilityError, ReliabilityResult};
pub use helper::{ReliabilityTelemetry, ReliabilityTelemetryBuilder};
pub use model::{
    AlertLevel, BreakPrediction, Category, Order, ReliabilityMetrics, ReliabilitySummary,
    ReliabilityWindow, TelemetryBundle, TelemetryReading,
};
pub use runtime::{ReliabilityEngine, ReliabilityEngineBuilder, ReliabilityRequest};
pub use settings::{ReliabilityConfig, ReliabilitySettings};
