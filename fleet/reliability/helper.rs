use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use fleet_event_bus::{EventPublisher, EventRecord};
use fleet_logging::{JsonLogger, LogLevel, LogRecord};
use serde_json::{json, Value};

use crate::model::{AlertLevel, ReliabilitySummary};

/// Event type published when a vehicle's break alert reaches warning or error.
pub const BREAK_ALERT_EVENT: &str = "reliability.break_alert";

/// Telemetry builder for the reliability engine.
pub struct ReliabilityTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl ReliabilityTelemetryBuilder {
    /// Creates a new builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Info,
            event_publisher: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<ReliabilityTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::with_min_level(path, self.min_level)?),
            None => None,
        };
        Ok(ReliabilityTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by the engine and its per-vehicle tasks.
#[derive(Clone)]
pub struct ReliabilityTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for ReliabilityTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliabilityTelemetry")
            .field("module", &self.inner.module)
            .field("logs", &self.inner.logger.is_some())
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl ReliabilityTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> ReliabilityTelemetryBuilder {
        ReliabilityTelemetryBuilder::new(module)
    }

    /// Writes a structured record, optionally scoped to a vehicle.
    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        vehicle_id: Option<&str>,
        metadata: &Value,
    ) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let mut record =
                LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            if let Some(vehicle_id) = vehicle_id {
                record = record.with_vehicle(vehicle_id);
            }
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Publishes an event when a publisher is configured.
    pub async fn event(&self, record: EventRecord) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher.publish(record).await?;
        }
        Ok(())
    }

    /// Publishes a break alert for summaries at warning or error level.
    /// Returns whether an alert was due.
    pub async fn break_alert(&self, summary: &ReliabilitySummary) -> Result<bool> {
        let prediction = &summary.break_prediction;
        if prediction.break_alert_level < AlertLevel::Warning {
            return Ok(false);
        }
        let payload = json!({
            "level": prediction.break_alert_level,
            "reason": prediction.break_preventive_reason,
            "preventiveRecommended": prediction.break_preventive_recommended,
            "kmToBreak": prediction.km_to_break,
            "hrToBreak": prediction.hr_to_break,
            "etaBreakDateKm": prediction.eta_break_date_km,
            "etaBreakDateHr": prediction.eta_break_date_hr,
        });
        let level = if prediction.break_alert_level == AlertLevel::Error {
            LogLevel::Error
        } else {
            LogLevel::Warn
        };
        self.log(level, BREAK_ALERT_EVENT, Some(&summary.vehicle_id), &payload)?;
        self.event(
            EventRecord::new(&self.inner.module, BREAK_ALERT_EVENT, payload)
                .for_vehicle(&summary.vehicle_id),
        )
        .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BreakPrediction, PreventiveReason, ReliabilityMetrics, TelemetryBundle};
    use fleet_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    fn summary(level: AlertLevel) -> ReliabilitySummary {
        ReliabilitySummary {
            vehicle_id: "CAM-7".into(),
            metrics: ReliabilityMetrics::idle(24.0),
            telemetry: TelemetryBundle::default(),
            break_prediction: BreakPrediction {
                break_alert_level: level,
                km_alert_level: level,
                break_preventive_recommended: level == AlertLevel::Error,
                break_preventive_reason: (level == AlertLevel::Error)
                    .then_some(PreventiveReason::Km),
                ..BreakPrediction::default()
            },
        }
    }

    #[tokio::test]
    async fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(4));
        let log_path = tmp.path().join("reliability.log");
        let telemetry = ReliabilityTelemetry::builder("reliability")
            .log_path(&log_path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(
                LogLevel::Info,
                "reliability.batch.start",
                Some("CAM-7"),
                &json!({ "vehicles": 1 }),
            )
            .unwrap();
        telemetry
            .event(EventRecord::new("reliability", "reliability.batch.completed", json!({})))
            .await
            .unwrap();
        let written = std::fs::read_to_string(&log_path).unwrap();
        assert!(written.contains("reliability.batch.start"));
        assert!(written.contains("CAM-7"));
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn only_warning_and_error_raise_alerts() {
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = ReliabilityTelemetry::builder("reliability")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        assert!(!telemetry.break_alert(&summary(AlertLevel::Success)).await.unwrap());
        assert!(!telemetry.break_alert(&summary(AlertLevel::None)).await.unwrap());
        assert!(telemetry.break_alert(&summary(AlertLevel::Warning)).await.unwrap());
        assert!(telemetry.break_alert(&summary(AlertLevel::Error)).await.unwrap());

        let alerts = bus.of_type(BREAK_ALERT_EVENT);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].vehicle_id.as_deref(), Some("CAM-7"));
        assert_eq!(alerts[1].payload["level"], "error");
        assert_eq!(alerts[1].payload["reason"], "km");
    }

    #[test]
    fn min_level_filters_records() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("quiet.log");
        let telemetry = ReliabilityTelemetry::builder("reliability")
            .log_path(&log_path)
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "reliability.cache.hit", None, &Value::Null)
            .unwrap();
        telemetry
            .log(LogLevel::Error, "reliability.task.failed", None, &Value::Null)
            .unwrap();
        let written = std::fs::read_to_string(&log_path).unwrap();
        assert!(!written.contains("cache.hit"));
        assert!(written.contains("task.failed"));
    }
}
