use chrono::{DateTime, NaiveDate, Utc};
use indexmap::{IndexMap, IndexSet};

use crate::{
    metrics::compute_metrics,
    model::{Order, ReliabilitySummary, ReliabilityWindow, TelemetryReading},
    prediction::{failure_events, predict_break},
    settings::ReliabilitySettings,
    usage::{backfill_event_readings, sorted_readings, telemetry_bundle},
};

/// Orders grouped by vehicle id.
pub type OrdersByVehicle = IndexMap<String, Vec<Order>>;
/// Telemetry grouped by vehicle id.
pub type TelemetryByVehicle = IndexMap<String, Vec<TelemetryReading>>;

/// Groups orders by their vehicle id, keeping input order inside each group.
#[must_use]
pub fn group_orders(orders: impl IntoIterator<Item = Order>) -> OrdersByVehicle {
    let mut grouped = OrdersByVehicle::new();
    for order in orders {
        grouped.entry(order.vehicle_id.clone()).or_default().push(order);
    }
    grouped
}

/// Groups telemetry readings by their vehicle id.
#[must_use]
pub fn group_telemetry(readings: impl IntoIterator<Item = TelemetryReading>) -> TelemetryByVehicle {
    let mut grouped = TelemetryByVehicle::new();
    for reading in readings {
        grouped
            .entry(reading.vehicle_id.clone())
            .or_default()
            .push(reading);
    }
    grouped
}

/// Vehicles a batch covers: exactly `requested` (deduplicated, in order) when
/// given, otherwise every vehicle with orders, sorted by id.
#[must_use]
pub fn vehicles_to_summarize(
    orders_by_vehicle: &OrdersByVehicle,
    requested: Option<&[String]>,
) -> Vec<String> {
    match requested {
        Some(ids) => ids.iter().cloned().collect::<IndexSet<_>>().into_iter().collect(),
        None => {
            let mut ids: Vec<String> = orders_by_vehicle.keys().cloned().collect();
            ids.sort();
            ids
        }
    }
}

/// Full summary for one vehicle: metrics, telemetry bundle and break prediction.
///
/// Every corrective order supplied feeds the predictor, including history
/// outside the window; only the metrics are window-bound.
#[must_use]
pub fn summarize_vehicle(
    vehicle_id: &str,
    orders: &[Order],
    readings: &[TelemetryReading],
    window: &ReliabilityWindow,
    now: DateTime<Utc>,
    today: NaiveDate,
    settings: &ReliabilitySettings,
) -> ReliabilitySummary {
    let readings = sorted_readings(readings);
    let mut orders = orders.to_vec();
    backfill_event_readings(&mut orders, &readings);

    let metrics = compute_metrics(&orders, window, now);
    let telemetry = telemetry_bundle(&readings, now, settings.usage_window_days);
    let events = failure_events(&orders, settings.history_limit);
    let break_prediction = predict_break(&events, &telemetry, settings, today);

    ReliabilitySummary {
        vehicle_id: vehicle_id.to_owned(),
        metrics,
        telemetry,
        break_prediction,
    }
}

/// Builds one summary per vehicle, sequentially.
#[must_use]
pub fn build_summaries(
    orders_by_vehicle: &OrdersByVehicle,
    telemetry_by_vehicle: &TelemetryByVehicle,
    vehicle_ids: Option<&[String]>,
    window: &ReliabilityWindow,
    now: DateTime<Utc>,
    today: NaiveDate,
    settings: &ReliabilitySettings,
) -> IndexMap<String, ReliabilitySummary> {
    vehicles_to_summarize(orders_by_vehicle, vehicle_ids)
        .into_iter()
        .map(|vehicle_id| {
            let orders = orders_by_vehicle.get(&vehicle_id).map_or(&[][..], Vec::as_slice);
            let readings = telemetry_by_vehicle
                .get(&vehicle_id)
                .map_or(&[][..], Vec::as_slice);
            let summary =
                summarize_vehicle(&vehicle_id, orders, readings, window, now, today, settings);
            (vehicle_id, summary)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertLevel, ReliabilityMetrics, TelemetryBundle};
    use chrono::{Duration, TimeZone};

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 8, 0, 0).unwrap()
    }

    fn october() -> ReliabilityWindow {
        ReliabilityWindow::new(
            Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 31, 0, 0, 0).unwrap(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 31, 0, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 30).unwrap()
    }

    fn failure(id: &str, vehicle: &str, start: DateTime<Utc>, hours: i64) -> Order {
        Order::new(id, vehicle, "ZF02", start).with_end(start + Duration::hours(hours))
    }

    fn fleet() -> (OrdersByVehicle, TelemetryByVehicle) {
        let orders = group_orders(vec![
            failure("1", "CAM-2", at(8, 1), 5).with_km(10_000.0),
            failure("2", "CAM-2", at(9, 1), 5).with_km(12_000.0),
            failure("3", "CAM-2", at(10, 5), 4).with_km(14_000.0),
            failure("4", "CAM-1", at(10, 10), 2),
        ]);
        let telemetry = group_telemetry(vec![
            TelemetryReading::new("CAM-2", at(10, 1), 13_500.0, 900.0),
            TelemetryReading::new("CAM-2", at(10, 29), 15_500.0, 1_000.0),
            TelemetryReading::new("CAM-2", at(10, 15), 14_500.0, 950.0),
        ]);
        (orders, telemetry)
    }

    #[test]
    fn summarizes_every_vehicle_with_orders() {
        let (orders, telemetry) = fleet();
        let summaries = build_summaries(
            &orders,
            &telemetry,
            None,
            &october(),
            now(),
            today(),
            &ReliabilitySettings::default(),
        );
        assert_eq!(summaries.keys().collect::<Vec<_>>(), vec!["CAM-1", "CAM-2"]);

        let cam2 = &summaries["CAM-2"];
        assert_eq!(cam2.metrics.falhas, 1);
        assert!((cam2.metrics.downtime_total - 4.0).abs() < 1e-9);
        assert_eq!(cam2.telemetry.current_km, Some(15_500.0));
        assert_eq!(cam2.break_prediction.km_break, Some(2_000.0));
        assert_eq!(cam2.break_prediction.next_break_km, Some(17_500.0));
        assert_eq!(cam2.break_prediction.km_to_break, Some(2_000.0));
        assert_eq!(cam2.break_prediction.km_alert_level, AlertLevel::Success);

        let cam1 = &summaries["CAM-1"];
        assert_eq!(cam1.metrics.falhas, 1);
        assert_eq!(cam1.break_prediction.km_break, None);
        assert_eq!(cam1.telemetry, TelemetryBundle::default());
    }

    #[test]
    fn requested_vehicles_are_iterated_exactly() {
        let (orders, telemetry) = fleet();
        let requested = vec!["CAM-9".to_string(), "CAM-2".to_string(), "CAM-9".to_string()];
        let summaries = build_summaries(
            &orders,
            &telemetry,
            Some(&requested),
            &october(),
            now(),
            today(),
            &ReliabilitySettings::default(),
        );
        assert_eq!(summaries.keys().collect::<Vec<_>>(), vec!["CAM-9", "CAM-2"]);
        let empty = &summaries["CAM-9"];
        assert_eq!(empty.metrics, ReliabilityMetrics::idle(720.0));
        assert_eq!(empty.break_prediction.break_alert_level, AlertLevel::None);
    }

    #[test]
    fn backfilled_readings_feed_prediction() {
        let orders = group_orders(vec![
            failure("1", "CAM-3", at(9, 2), 1),
            failure("2", "CAM-3", at(10, 2), 1),
        ]);
        let telemetry = group_telemetry(vec![
            TelemetryReading::new("CAM-3", at(9, 1), 1_000.0, 100.0),
            TelemetryReading::new("CAM-3", at(10, 1), 4_000.0, 400.0),
            TelemetryReading::new("CAM-3", at(10, 20), 6_000.0, 600.0),
        ]);
        let summaries = build_summaries(
            &orders,
            &telemetry,
            None,
            &october(),
            now(),
            today(),
            &ReliabilitySettings::default(),
        );
        let prediction = &summaries["CAM-3"].break_prediction;
        assert_eq!(prediction.km_break, Some(3_000.0));
        assert_eq!(prediction.hr_break, Some(300.0));
        assert_eq!(prediction.next_break_km, Some(9_000.0));
        assert_eq!(prediction.km_to_break, Some(3_000.0));
    }

    #[test]
    fn empty_fleet_gives_empty_map() {
        let summaries = build_summaries(
            &OrdersByVehicle::new(),
            &TelemetryByVehicle::new(),
            None,
            &october(),
            now(),
            today(),
            &ReliabilitySettings::default(),
        );
        assert!(summaries.is_empty());
    }
}
