//! Boundary adapter from raw export records to typed orders and telemetry.
//!
//! Exports from the maintenance and fuel systems name the same field in
//! several ways; every alias chain lives here so the engine only ever sees
//! typed records.

use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use fleet_reliability::{classifier::fold_accents, Order, TelemetryReading};
use serde_json::{Map, Value};

const VEHICLE: &[&str] = &["vehicleId", "vehicle_id", "veiculo", "placa", "frota", "equipamento"];
const ORDER_ID: &[&str] = &["id", "orderId", "ordem", "numeroOrdem", "numero"];
const ORDER_TYPE: &[&str] = &["tipo", "tipoOrdem", "category", "type", "orderType"];
const START: &[&str] = &["inicio", "dataInicio", "start"];
const END: &[&str] = &["fim", "dataFim", "end"];
const KM: &[&str] = &["km", "kmAtEvent", "hodometro"];
const HR: &[&str] = &["hr", "horimetro", "hrAtEvent"];
const STOP: &[&str] = &["parada", "hasStop"];
const STATUS: &[&str] = &["status", "situacao"];
const READING_TIME: &[&str] = &["timestamp", "dataHora", "data", "date"];

/// Array keys recognised when a document wraps its records in an object.
const WRAPPERS: &[&str] = &["value", "items", "data", "records", "orders", "telemetry"];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Typed records plus the number of raw records that could not be mapped.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapped<T> {
    /// Successfully mapped records.
    pub records: Vec<T>,
    /// Records dropped for a missing vehicle or an unparsable timestamp.
    pub dropped: usize,
}

/// Extracts the record list of an export document.
pub fn records_from_document(document: Value) -> Result<Vec<Value>> {
    match document {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => {
            for key in WRAPPERS {
                if let Some(Value::Array(items)) = obj.remove(*key) {
                    return Ok(items);
                }
            }
            bail!("expected a JSON array or an object wrapping one under {WRAPPERS:?}")
        }
        other => bail!("expected a JSON array of records, found {}", kind(&other)),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn field<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| obj.get(*alias))
        .find(|value| !value.is_null())
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses a timestamp. Values without an offset are read in `offset`.
///
/// Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM[:SS]`, `DD/MM/YYYY HH:MM[:SS]`,
/// bare dates and epoch milliseconds (as a number or a digit string).
#[must_use]
pub fn parse_timestamp(value: &Value, offset: FixedOffset) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(raw) => parse_timestamp_str(raw, offset),
        _ => None,
    }
}

/// String form of [`parse_timestamp`].
#[must_use]
pub fn parse_timestamp_str(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) && raw.len() > 8 {
        return raw.parse().ok().and_then(DateTime::from_timestamp_millis);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Parses a counter. Strings may use a decimal comma (`"12.345,6"`).
#[must_use]
pub fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.contains(',') {
                raw.replace('.', "").replace(',', ".").parse().ok()
            } else {
                raw.parse().ok()
            }
        }
        _ => None,
    };
    number.filter(|n: &f64| n.is_finite())
}

/// Parses a yes/no flag in English or Portuguese.
#[must_use]
pub fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(raw) => match fold_accents(raw.trim()).as_str() {
            "true" | "sim" | "s" | "yes" | "y" | "1" => Some(true),
            "false" | "nao" | "n" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Maps one raw order. Orders without a number get `<vehicle>@<start ms>`.
#[must_use]
pub fn map_order(raw: &Value, offset: FixedOffset) -> Option<Order> {
    let obj = raw.as_object()?;
    let vehicle_id = field(obj, VEHICLE).and_then(text)?;
    let start = field(obj, START).and_then(|v| parse_timestamp(v, offset))?;
    let id = field(obj, ORDER_ID)
        .and_then(text)
        .unwrap_or_else(|| format!("{vehicle_id}@{}", start.timestamp_millis()));
    let order_type = field(obj, ORDER_TYPE).and_then(text).unwrap_or_default();

    let mut order = Order::new(id, vehicle_id, order_type, start);
    order.end = field(obj, END).and_then(|v| parse_timestamp(v, offset));
    order.has_stop = field(obj, STOP).and_then(parse_flag).unwrap_or(true);
    order.km_at_event = field(obj, KM).and_then(parse_number);
    order.hr_at_event = field(obj, HR).and_then(parse_number);
    order.status = field(obj, STATUS).and_then(text);
    Some(order)
}

/// Maps one raw telemetry snapshot. Snapshots carrying neither counter are dropped.
#[must_use]
pub fn map_reading(raw: &Value, offset: FixedOffset) -> Option<TelemetryReading> {
    let obj = raw.as_object()?;
    let vehicle_id = field(obj, VEHICLE).and_then(text)?;
    let timestamp = field(obj, READING_TIME).and_then(|v| parse_timestamp(v, offset))?;
    let km = field(obj, KM).and_then(parse_number);
    let hr = field(obj, HR).and_then(parse_number);
    if km.is_none() && hr.is_none() {
        return None;
    }
    Some(TelemetryReading {
        vehicle_id,
        timestamp,
        km,
        hr,
    })
}

fn map_all<T>(raw: &[Value], map: impl Fn(&Value) -> Option<T>) -> Mapped<T> {
    let records: Vec<T> = raw.iter().filter_map(map).collect();
    Mapped {
        dropped: raw.len() - records.len(),
        records,
    }
}

/// Maps an order export.
#[must_use]
pub fn map_orders(raw: &[Value], offset: FixedOffset) -> Mapped<Order> {
    map_all(raw, |value| map_order(value, offset))
}

/// Maps a telemetry export.
#[must_use]
pub fn map_readings(raw: &[Value], offset: FixedOffset) -> Mapped<TelemetryReading> {
    map_all(raw, |value| map_reading(value, offset))
}
