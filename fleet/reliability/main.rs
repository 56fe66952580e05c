use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use fleet_event_bus::FileEventPublisher;
use fleet_logging::LogLevel;
use indexmap::IndexMap;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    aggregator::{summarize_vehicle, vehicles_to_summarize, OrdersByVehicle, TelemetryByVehicle},
    cache::{CacheKey, SummaryCache},
    clock::{offset_from_hours, Clock, SystemClock},
    error::{ReliabilityError, ReliabilityResult},
    helper::ReliabilityTelemetry,
    model::{ReliabilitySummary, ReliabilityWindow},
    settings::{ReliabilityConfig, ReliabilitySettings},
};

/// One batch request against the engine.
#[derive(Debug, Clone)]
pub struct ReliabilityRequest {
    /// Metrics window.
    pub window: ReliabilityWindow,
    /// Vehicles to cover; every vehicle with orders when `None`.
    pub vehicle_ids: Option<Vec<String>>,
    /// Instant standing in for "now"; the engine clock when `None`.
    pub as_of: Option<DateTime<Utc>>,
    /// Revision of the source data, bumped by the caller on every change.
    pub data_revision: u64,
    /// Whether memoized summaries may be served.
    pub use_cache: bool,
}

impl ReliabilityRequest {
    /// Request for `window` over every vehicle, served from cache when possible.
    #[must_use]
    pub const fn new(window: ReliabilityWindow) -> Self {
        Self {
            window,
            vehicle_ids: None,
            as_of: None,
            data_revision: 0,
            use_cache: true,
        }
    }

    /// Restricts the batch to the given vehicles.
    #[must_use]
    pub fn vehicles(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.vehicle_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Pins "now".
    #[must_use]
    pub const fn as_of(mut self, now: DateTime<Utc>) -> Self {
        self.as_of = Some(now);
        self
    }

    /// Sets the source data revision.
    #[must_use]
    pub const fn revision(mut self, data_revision: u64) -> Self {
        self.data_revision = data_revision;
        self
    }

    /// Forces recomputation.
    #[must_use]
    pub const fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Computes fleet summaries, one blocking task per vehicle.
#[derive(Debug)]
pub struct ReliabilityEngine {
    clock: Arc<dyn Clock>,
    settings: Arc<ReliabilitySettings>,
    cache: Option<SummaryCache>,
    telemetry: Option<ReliabilityTelemetry>,
}

enum Slot {
    Cached(Box<ReliabilitySummary>),
    Pending(CacheKey, JoinHandle<ReliabilitySummary>),
}

impl ReliabilityEngine {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> ReliabilityEngineBuilder {
        ReliabilityEngineBuilder::default()
    }

    /// Summarizes every vehicle of the request, keyed in iteration order.
    ///
    /// Vehicles with no orders or telemetry get zeroed metrics and an empty
    /// prediction. A panicking vehicle task fails the whole batch.
    pub async fn summarize(
        &self,
        orders: &OrdersByVehicle,
        readings: &TelemetryByVehicle,
        request: &ReliabilityRequest,
    ) -> ReliabilityResult<IndexMap<String, ReliabilitySummary>> {
        let started = Instant::now();
        let now = request.as_of.unwrap_or_else(|| self.clock.now());
        let today = self.clock.date_of(now);
        let vehicles = vehicles_to_summarize(orders, request.vehicle_ids.as_deref());
        info!(vehicles = vehicles.len(), %now, "reliability batch started");
        self.log(
            LogLevel::Info,
            "reliability.batch.start",
            None,
            &json!({
                "vehicles": vehicles.len(),
                "from": request.window.from,
                "to": request.window.to,
                "now": now,
                "revision": request.data_revision,
            }),
        );

        let mut slots = Vec::with_capacity(vehicles.len());
        let mut cache_hits = 0_usize;
        for vehicle_id in vehicles {
            let key = CacheKey::new(
                vehicle_id.clone(),
                &request.window,
                request.as_of,
                &self.settings,
                request.data_revision,
            );
            let cached = self
                .cache
                .as_ref()
                .filter(|_| request.use_cache)
                .and_then(|cache| cache.get(&key));
            if let Some(summary) = cached {
                cache_hits += 1;
                self.log(LogLevel::Debug, "reliability.cache.hit", Some(&vehicle_id), &json!({}));
                slots.push((vehicle_id, Slot::Cached(Box::new(summary))));
                continue;
            }

            let vehicle_orders = orders.get(&vehicle_id).cloned().unwrap_or_default();
            let vehicle_readings = readings.get(&vehicle_id).cloned().unwrap_or_default();
            let window = request.window;
            let settings = Arc::clone(&self.settings);
            let task_vehicle = vehicle_id.clone();
            let handle = tokio::task::spawn_blocking(move || {
                summarize_vehicle(
                    &task_vehicle,
                    &vehicle_orders,
                    &vehicle_readings,
                    &window,
                    now,
                    today,
                    &settings,
                )
            });
            slots.push((vehicle_id, Slot::Pending(key, handle)));
        }

        let mut summaries = IndexMap::with_capacity(slots.len());
        let mut alerts = 0_usize;
        for (vehicle_id, slot) in slots {
            let summary = match slot {
                Slot::Cached(summary) => *summary,
                Slot::Pending(key, handle) => {
                    let summary = handle.await.map_err(|err| {
                        self.log(
                            LogLevel::Error,
                            "reliability.task.failed",
                            Some(&vehicle_id),
                            &json!({ "error": err.to_string() }),
                        );
                        ReliabilityError::Task {
                            vehicle_id: vehicle_id.clone(),
                            message: err.to_string(),
                        }
                    })?;
                    self.log(
                        LogLevel::Debug,
                        "reliability.vehicle.computed",
                        Some(&vehicle_id),
                        &json!({
                            "falhas": summary.metrics.falhas,
                            "availability": summary.metrics.availability,
                            "breakAlertLevel": summary.break_prediction.break_alert_level,
                        }),
                    );
                    if let Some(cache) = &self.cache {
                        cache.insert(key, summary.clone());
                    }
                    if self.raise_alert(&summary).await {
                        alerts += 1;
                    }
                    summary
                }
            };
            summaries.insert(vehicle_id, summary);
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            vehicles = summaries.len(),
            cache_hits, alerts, elapsed_ms, "reliability batch completed"
        );
        self.log(
            LogLevel::Info,
            "reliability.batch.completed",
            None,
            &json!({
                "vehicles": summaries.len(),
                "cacheHits": cache_hits,
                "alerts": alerts,
                "elapsedMs": elapsed_ms,
            }),
        );
        Ok(summaries)
    }

    /// Summary for a single vehicle.
    pub async fn summarize_one(
        &self,
        vehicle_id: &str,
        orders: &OrdersByVehicle,
        readings: &TelemetryByVehicle,
        request: &ReliabilityRequest,
    ) -> ReliabilityResult<ReliabilitySummary> {
        let request = request.clone().vehicles([vehicle_id]);
        let mut summaries = self.summarize(orders, readings, &request).await?;
        summaries
            .shift_remove(vehicle_id)
            .ok_or_else(|| ReliabilityError::Task {
                vehicle_id: vehicle_id.to_owned(),
                message: "no summary produced".into(),
            })
    }

    /// Drops memoized summaries of one vehicle. Returns how many were removed.
    pub fn invalidate_vehicle(&self, vehicle_id: &str) -> usize {
        let removed = self
            .cache
            .as_ref()
            .map_or(0, |cache| cache.invalidate_vehicle(vehicle_id));
        self.log(
            LogLevel::Debug,
            "reliability.cache.invalidated",
            Some(vehicle_id),
            &json!({ "entries": removed }),
        );
        removed
    }

    /// Drops every memoized summary.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Settings in effect.
    #[must_use]
    pub fn settings(&self) -> &ReliabilitySettings {
        &self.settings
    }

    /// Engine time source.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Memo, when enabled.
    #[must_use]
    pub const fn cache(&self) -> Option<&SummaryCache> {
        self.cache.as_ref()
    }

    /// Returns telemetry handle.
    #[must_use]
    pub const fn telemetry(&self) -> Option<&ReliabilityTelemetry> {
        self.telemetry.as_ref()
    }

    fn log(
        &self,
        level: LogLevel,
        message: &str,
        vehicle_id: Option<&str>,
        metadata: &serde_json::Value,
    ) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.log(level, message, vehicle_id, metadata) {
                warn!(%err, message, "reliability log write failed");
            }
        }
    }

    async fn raise_alert(&self, summary: &ReliabilitySummary) -> bool {
        let Some(telemetry) = &self.telemetry else {
            return false;
        };
        match telemetry.break_alert(summary).await {
            Ok(raised) => raised,
            Err(err) => {
                warn!(%err, vehicle = %summary.vehicle_id, "break alert delivery failed");
                false
            }
        }
    }
}

/// Builder for `ReliabilityEngine`.
#[derive(Debug, Default)]
pub struct ReliabilityEngineBuilder {
    clock: Option<Arc<dyn Clock>>,
    settings: ReliabilitySettings,
    cache_ttl_secs: Option<u64>,
    telemetry: Option<ReliabilityTelemetry>,
}

impl ReliabilityEngineBuilder {
    /// Builder mirroring a validated configuration document: operating
    /// timezone, estimator, cache and log/alert sinks.
    pub fn from_config(config: &ReliabilityConfig) -> ReliabilityResult<Self> {
        let offset = offset_from_hours(config.clock.utc_offset_hours)?;
        let mut builder = Self::default()
            .clock(Arc::new(SystemClock::new(offset)))
            .settings(config.settings());
        if config.cache.enabled {
            builder = builder.cache_ttl(config.cache.ttl_secs);
        }

        let logging = &config.logging;
        if logging.path.is_some() || logging.alerts_path.is_some() {
            let mut telemetry =
                ReliabilityTelemetry::builder("reliability").min_level(logging.min_level);
            if let Some(path) = &logging.path {
                telemetry = telemetry.log_path(path);
            }
            if let Some(path) = &logging.alerts_path {
                let publisher = FileEventPublisher::new(path)
                    .map_err(|err| ReliabilityError::Config(format!("alerts sink: {err:#}")))?;
                telemetry = telemetry.event_publisher(Arc::new(publisher));
            }
            let telemetry = telemetry
                .build()
                .map_err(|err| ReliabilityError::Config(format!("log sink: {err:#}")))?;
            builder = builder.telemetry(telemetry);
        }
        Ok(builder)
    }

    /// Sets the time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the computation settings.
    #[must_use]
    pub fn settings(mut self, settings: ReliabilitySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Enables memoization with the given entry lifetime.
    #[must_use]
    pub const fn cache_ttl(mut self, ttl_secs: u64) -> Self {
        self.cache_ttl_secs = Some(ttl_secs);
        self
    }

    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: ReliabilityTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> ReliabilityEngine {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::default()));
        let cache = self
            .cache_ttl_secs
            .map(|ttl| SummaryCache::new(ttl, Arc::clone(&clock)));
        ReliabilityEngine {
            clock,
            settings: Arc::new(self.settings),
            cache,
            telemetry: self.telemetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregator::{group_orders, group_telemetry},
        clock::FixedClock,
        helper::BREAK_ALERT_EVENT,
        model::{AlertLevel, Order, TelemetryReading},
        settings::BreakAnchor,
    };
    use chrono::{Duration, TimeZone};
    use fleet_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 12, 0, 0).unwrap()
    }

    fn october() -> ReliabilityWindow {
        ReliabilityWindow::new(
            Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 31, 0, 0, 0).unwrap(),
        )
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 10, 31, 0, 0, 0).unwrap(),
            offset_from_hours(-3.0).unwrap(),
        ))
    }

    fn failure(id: &str, vehicle: &str, start: DateTime<Utc>, km: f64) -> Order {
        Order::new(id, vehicle, "ZF02", start)
            .with_end(start + Duration::hours(6))
            .with_km(km)
    }

    fn fleet() -> (OrdersByVehicle, TelemetryByVehicle) {
        let orders = group_orders(vec![
            failure("a1", "CAM-A", at(8, 1), 10_000.0),
            failure("a2", "CAM-A", at(9, 1), 11_000.0),
            failure("a3", "CAM-A", at(10, 2), 12_000.0),
            failure("b1", "CAM-B", at(10, 10), 50_000.0),
        ]);
        let readings = group_telemetry(vec![
            TelemetryReading::new("CAM-A", at(10, 5), 12_500.0, 800.0),
            TelemetryReading::new("CAM-A", at(10, 30), 12_980.0, 820.0),
        ]);
        (orders, readings)
    }

    #[tokio::test]
    async fn engine_summarizes_fleet_and_raises_alerts() {
        let tmp = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = ReliabilityTelemetry::builder("reliability")
            .log_path(tmp.path().join("reliability.log"))
            .min_level(LogLevel::Debug)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let engine = ReliabilityEngine::builder()
            .clock(clock())
            .settings(ReliabilitySettings {
                anchor: BreakAnchor::LastFailure,
                ..ReliabilitySettings::default()
            })
            .cache_ttl(600)
            .telemetry(telemetry)
            .build();
        let (orders, readings) = fleet();

        let summaries = engine
            .summarize(&orders, &readings, &ReliabilityRequest::new(october()))
            .await
            .unwrap();
        assert_eq!(summaries.keys().collect::<Vec<_>>(), vec!["CAM-A", "CAM-B"]);
        let cam_a = &summaries["CAM-A"];
        assert_eq!(cam_a.metrics.falhas, 1);
        assert!((cam_a.metrics.downtime_total - 6.0).abs() < 1e-9);
        // 20 km left of a 1000 km interval, measured from the last failure
        assert_eq!(cam_a.break_prediction.km_to_break, Some(20.0));
        assert_eq!(cam_a.break_prediction.break_alert_level, AlertLevel::Error);

        let alerts = bus.of_type(BREAK_ALERT_EVENT);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].vehicle_id.as_deref(), Some("CAM-A"));

        let again = engine
            .summarize(&orders, &readings, &ReliabilityRequest::new(october()))
            .await
            .unwrap();
        assert_eq!(again, summaries);
        assert_eq!(bus.of_type(BREAK_ALERT_EVENT).len(), 1);
        let log = std::fs::read_to_string(tmp.path().join("reliability.log")).unwrap();
        assert!(log.contains("reliability.batch.start"));
        assert!(log.contains("reliability.vehicle.computed"));
        assert!(log.contains("reliability.cache.hit"));
        assert!(log.contains("reliability.batch.completed"));
    }

    #[tokio::test]
    async fn revision_and_invalidation_bypass_memo() {
        let engine = ReliabilityEngine::builder()
            .clock(clock())
            .cache_ttl(600)
            .build();
        let (mut orders, readings) = fleet();
        let request = ReliabilityRequest::new(october()).vehicles(["CAM-B"]);
        let first = engine.summarize(&orders, &readings, &request).await.unwrap();
        assert_eq!(first["CAM-B"].metrics.falhas, 1);

        orders
            .get_mut("CAM-B")
            .unwrap()
            .push(failure("b2", "CAM-B", at(10, 20), 51_000.0));
        let stale = engine.summarize(&orders, &readings, &request).await.unwrap();
        assert_eq!(stale["CAM-B"].metrics.falhas, 1);

        let fresh = engine
            .summarize(&orders, &readings, &request.clone().revision(1))
            .await
            .unwrap();
        assert_eq!(fresh["CAM-B"].metrics.falhas, 2);

        // the revision 0 entry was replaced when revision 1 was stored
        assert_eq!(engine.invalidate_vehicle("CAM-B"), 1);
        let forced = engine
            .summarize(&orders, &readings, &request.clone().bypass_cache())
            .await
            .unwrap();
        assert_eq!(forced["CAM-B"].metrics.falhas, 2);
    }

    #[tokio::test]
    async fn memo_holds_one_entry_per_vehicle_across_revisions() {
        let engine = ReliabilityEngine::builder()
            .clock(clock())
            .cache_ttl(600)
            .build();
        let (orders, readings) = fleet();
        let request = ReliabilityRequest::new(october()).vehicles(["CAM-A"]);
        for revision in 0..1_000 {
            engine
                .summarize(&orders, &readings, &request.clone().revision(revision))
                .await
                .unwrap();
        }
        assert_eq!(engine.cache().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn default_settings_project_from_current_reading() {
        let engine = ReliabilityEngine::builder().clock(clock()).build();
        let (orders, readings) = fleet();
        let summary = engine
            .summarize_one("CAM-A", &orders, &readings, &ReliabilityRequest::new(october()))
            .await
            .unwrap();
        let prediction = &summary.break_prediction;
        assert_eq!(prediction.km_break, Some(1_000.0));
        assert_eq!(prediction.next_break_km, Some(13_980.0));
        assert_eq!(prediction.km_to_break, Some(1_000.0));
        assert_eq!(prediction.km_alert_level, AlertLevel::Success);
    }

    #[tokio::test]
    async fn unknown_vehicle_gets_zeroed_summary() {
        let engine = ReliabilityEngine::builder().clock(clock()).build();
        let (orders, readings) = fleet();
        let summary = engine
            .summarize_one("CAM-Z", &orders, &readings, &ReliabilityRequest::new(october()))
            .await
            .unwrap();
        assert_eq!(summary.metrics.falhas, 0);
        assert!((summary.metrics.availability - 1.0).abs() < f64::EPSILON);
        assert_eq!(summary.break_prediction.break_alert_level, AlertLevel::None);
        assert!(engine.cache().is_none());
    }

    #[tokio::test]
    async fn as_of_overrides_clock() {
        let engine = ReliabilityEngine::builder().clock(clock()).build();
        let orders = group_orders(vec![Order::new("open", "CAM-C", "ZF02", at(10, 30))]);
        let request =
            ReliabilityRequest::new(october()).as_of(at(10, 30) + Duration::hours(3));
        let summaries = engine
            .summarize(&orders, &TelemetryByVehicle::new(), &request)
            .await
            .unwrap();
        let metrics = &summaries["CAM-C"].metrics;
        assert!((metrics.downtime_total - 3.0).abs() < 1e-9);
        assert_eq!(metrics.qtd_abertas_zf02, 1);
    }

    #[test]
    fn builder_follows_configuration() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("reliability.toml");
        std::fs::write(
            &path,
            "[estimator]\nmode = \"ema\"\nema_alpha = 0.5\n\n[cache]\nenabled = false\n\n[logging]\npath = \"logs/reliability.log\"\n",
        )
        .unwrap();
        let config = ReliabilityConfig::load(&path).unwrap();
        let engine = ReliabilityEngineBuilder::from_config(&config).unwrap().build();
        assert!(engine.cache().is_none());
        assert!(engine.telemetry().is_some());
        assert_eq!(engine.clock().offset().local_minus_utc(), -10_800);
        assert_eq!(
            engine.settings().estimator,
            crate::settings::BreakEstimator::Ema { alpha: 0.5 }
        );
        assert!(tmp.path().join("logs/reliability.log").exists());
    }
}
