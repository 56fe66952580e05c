//! `frota`: command-line harness around the fleet reliability engine.

mod mapping;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Parser, Subcommand};
use fleet_logging::LogLevel;
use fleet_reliability::{
    aggregator::{group_orders, group_telemetry},
    clock::offset_from_hours,
    ReliabilityConfig, ReliabilityEngine, ReliabilityEngineBuilder, ReliabilityRequest,
    ReliabilityWindow, TelemetryByVehicle,
};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

use crate::mapping::{map_orders, map_readings, parse_timestamp_str, records_from_document};

#[derive(Parser, Debug)]
#[command(name = "frota", version, about = "Fleet reliability: downtime, MTBF/MTTR and break prediction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarizes every vehicle of an order export over a window.
    Summarize(SummarizeArgs),
    /// Prints the effective configuration as TOML.
    Config {
        /// Configuration document; defaults apply when absent.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
struct SummarizeArgs {
    /// JSON export of work orders.
    #[arg(long)]
    orders: PathBuf,
    /// JSON export of odometer / hour-meter snapshots.
    #[arg(long)]
    telemetry: Option<PathBuf>,
    /// Window start.
    #[arg(long)]
    from: String,
    /// Window end.
    #[arg(long)]
    to: String,
    /// Restricts the batch to these vehicles (repeatable).
    #[arg(long = "vehicle")]
    vehicles: Vec<String>,
    /// Instant standing in for "now".
    #[arg(long)]
    now: Option<String>,
    /// Configuration document.
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON-lines run log, overriding the configuration.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Lowest level written to the run log.
    #[arg(long)]
    log_level: Option<String>,
    /// JSON-lines break alert sink, overriding the configuration.
    #[arg(long)]
    alerts: Option<PathBuf>,
    /// Pretty-prints the output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Summarize(args) => handle_summarize(args),
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ReliabilityConfig> {
    match path {
        Some(path) => ReliabilityConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(ReliabilityConfig::default()),
    }
}

fn read_records(path: &Path) -> Result<Vec<Value>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let document: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    records_from_document(document).with_context(|| format!("records in {}", path.display()))
}

fn instant(raw: &str, offset: FixedOffset, flag: &str) -> Result<DateTime<Utc>> {
    match parse_timestamp_str(raw, offset) {
        Some(ts) => Ok(ts),
        None => bail!("--{flag}: unrecognised timestamp {raw:?}"),
    }
}

/// Records skipped during mapping go to the run log, or to stderr without one.
fn report_dropped(engine: &ReliabilityEngine, source: &str, dropped: usize) {
    if dropped == 0 {
        return;
    }
    let logged = engine.telemetry().map(|telemetry| {
        telemetry.log(
            LogLevel::Warn,
            "frota.records.dropped",
            None,
            &json!({ "source": source, "dropped": dropped }),
        )
    });
    match logged {
        Some(Ok(())) => {}
        Some(Err(err)) => eprintln!("warning: {dropped} {source} record(s) dropped ({err:#})"),
        None => eprintln!("warning: {dropped} {source} record(s) dropped"),
    }
}

fn handle_summarize(args: SummarizeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(path) = args.log {
        config.logging.path = Some(path);
    }
    if let Some(level) = args.log_level.as_deref() {
        config.logging.min_level = LogLevel::parse(level)
            .with_context(|| format!("--log-level: unknown level {level:?}"))?;
    }
    if let Some(path) = args.alerts {
        config.logging.alerts_path = Some(path);
    }
    let offset = offset_from_hours(config.clock.utc_offset_hours)?;

    let window = ReliabilityWindow::new(
        instant(&args.from, offset, "from")?,
        instant(&args.to, offset, "to")?,
    );
    let mut request = ReliabilityRequest::new(window);
    if let Some(now) = args.now.as_deref() {
        request = request.as_of(instant(now, offset, "now")?);
    }
    if !args.vehicles.is_empty() {
        request = request.vehicles(args.vehicles);
    }

    let engine = ReliabilityEngineBuilder::from_config(&config)?.build();
    let orders = map_orders(&read_records(&args.orders)?, offset);
    report_dropped(&engine, "orders", orders.dropped);
    let readings = match &args.telemetry {
        Some(path) => {
            let readings = map_readings(&read_records(path)?, offset);
            report_dropped(&engine, "telemetry", readings.dropped);
            group_telemetry(readings.records)
        }
        None => TelemetryByVehicle::new(),
    };
    let orders = group_orders(orders.records);

    let summaries = Runtime::new()?.block_on(engine.summarize(&orders, &readings, &request))?;
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&summaries)?
    } else {
        serde_json::to_string(&summaries)?
    };
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cli_parses_summarize_flags() {
        let cli = Cli::try_parse_from([
            "frota",
            "summarize",
            "--orders",
            "os.json",
            "--from",
            "2025-10-01",
            "--to",
            "2025-10-31 23:59",
            "--vehicle",
            "CAM-1",
            "--vehicle",
            "CAM-2",
            "--pretty",
        ])
        .unwrap();
        let Commands::Summarize(args) = cli.command else {
            panic!("expected summarize");
        };
        assert_eq!(args.vehicles, vec!["CAM-1", "CAM-2"]);
        assert!(args.pretty);
        assert!(args.telemetry.is_none());
    }

    #[test]
    fn summarize_writes_log_and_alerts() {
        let tmp = tempdir().unwrap();
        let orders = tmp.path().join("orders.json");
        let telemetry = tmp.path().join("telemetry.json");
        fs::write(
            &orders,
            r#"{ "value": [
                { "ordem": "1", "placa": "CAM-1", "tipo": "ZF02", "inicio": "2025-08-01 08:00", "fim": "2025-08-01 12:00", "km": 10000 },
                { "ordem": "2", "placa": "CAM-1", "tipo": "ZF02", "inicio": "2025-09-01 08:00", "fim": "2025-09-01 12:00", "km": 11000 },
                { "ordem": "3", "placa": "CAM-1", "tipo": "ZF02", "inicio": "2025-10-01 08:00", "fim": "2025-10-01 12:00", "km": 12000 },
                { "ordem": "4", "placa": "CAM-1", "tipo": "ZF02", "inicio": "sem data" }
            ] }"#,
        )
        .unwrap();
        fs::write(
            &telemetry,
            r#"[ { "placa": "CAM-1", "dataHora": "2025-10-20 08:00", "hodometro": "12.990,0" } ]"#,
        )
        .unwrap();
        let config = tmp.path().join("frota.toml");
        fs::write(&config, "[estimator]\nanchor = \"last_failure\"\n").unwrap();
        let log = tmp.path().join("run.log");
        let alerts = tmp.path().join("alerts.jsonl");

        handle_summarize(SummarizeArgs {
            orders,
            telemetry: Some(telemetry),
            from: "2025-10-01".into(),
            to: "2025-10-31".into(),
            vehicles: Vec::new(),
            now: Some("2025-10-21 00:00".into()),
            config: Some(config),
            log: Some(log.clone()),
            log_level: Some("debug".into()),
            alerts: Some(alerts.clone()),
            pretty: false,
        })
        .unwrap();

        let run_log = fs::read_to_string(log).unwrap();
        assert!(run_log.contains("reliability.batch.completed"));
        let dropped = run_log
            .lines()
            .find(|line| line.contains("frota.records.dropped"))
            .expect("dropped order logged");
        assert!(dropped.contains("\"source\":\"orders\""));
        assert!(dropped.contains("\"dropped\":1"));
        let alert_log = fs::read_to_string(alerts).unwrap();
        assert!(alert_log.contains("reliability.break_alert"));
        assert!(alert_log.contains("CAM-1"));
    }

    #[test]
    fn bad_window_is_rejected() {
        let tmp = tempdir().unwrap();
        let orders = tmp.path().join("orders.json");
        fs::write(&orders, "[]").unwrap();
        let err = handle_summarize(SummarizeArgs {
            orders,
            telemetry: None,
            from: "amanhã".into(),
            to: "2025-10-31".into(),
            vehicles: Vec::new(),
            now: None,
            config: None,
            log: None,
            log_level: None,
            alerts: None,
            pretty: false,
        })
        .unwrap_err();
        assert!(err.to_string().contains("--from"));
    }
}
