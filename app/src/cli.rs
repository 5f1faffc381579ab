//! FieldWatch CLI Tool
//!
//! Operator queries over the fleet fixture and the recorded reading
//! journal: recommendations, calibration, telemetry, alert replay.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fieldwatch_sensors::{
    Assessed, CalibrationService, EscalationEngine, IncomingReading, ReportingService,
    RuleEvaluator, ThresholdRecommendation, ThresholdSuggestion, TimeRange,
};
use fieldwatch_store::{
    Alert, Band, CalibrationResult, Clock, DeviceId, Granularity, ManualClock, Reading, SensorId,
    SystemClock, TelemetryStore,
};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

mod config;
mod fleet;
mod logging;

use config::AppConfig;
use fleet::IngestBatch;

#[derive(Parser)]
#[command(name = "fieldwatch-cli")]
#[command(author = "FieldWatch Team")]
#[command(version)]
#[command(about = "FieldWatch operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the standard search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, global = true, default_value = "table")]
    format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend threshold bands for a sensor pin
    Recommend {
        #[arg(short, long)]
        device: DeviceId,

        #[arg(short, long)]
        pin: String,

        /// Look-back window (1h, 24h, 7d, 30d)
        #[arg(short, long, default_value = "7d")]
        range: TimeRange,

        /// Also show conservative to sensitive suggestions
        #[arg(long)]
        suggest: bool,
    },

    /// Calibrate one sensor, or every auto-calibrating sensor of a device
    Calibrate {
        #[arg(short, long)]
        device: DeviceId,

        #[arg(short, long)]
        sensor: Option<SensorId>,
    },

    /// Show aggregated telemetry
    Telemetry {
        #[arg(short, long)]
        device: DeviceId,

        #[arg(short, long)]
        pin: Option<String>,

        #[arg(short, long, default_value = "24h")]
        range: TimeRange,

        /// Bucket size (raw, hourly, daily)
        #[arg(short, long, default_value = "hourly")]
        granularity: Granularity,
    },

    /// Per-sensor statistics for a device
    Stats {
        #[arg(short, long)]
        device: DeviceId,

        #[arg(short, long, default_value = "24h")]
        range: TimeRange,
    },

    /// Evaluate batches from a JSON lines file ("-" for stdin)
    Evaluate {
        input: PathBuf,

        /// Append the evaluated readings to the journal
        #[arg(long)]
        record: bool,
    },

    /// Replay the journal through the rules and list the alerts it raises
    Alerts {
        #[arg(short, long)]
        device: Option<DeviceId>,

        /// Run the escalation scheduler at each replayed reading
        #[arg(long)]
        escalate: bool,
    },

    /// Generate sample configuration
    Config {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the resolved configuration instead of the example
        #[arg(long)]
        effective: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.config.as_deref())?;
    logging::init(&config, logging::CLI_FILTER, BoxMakeWriter::new(std::io::stderr));

    let json = match cli.format.as_str() {
        "json" => true,
        "table" => false,
        other => bail!("unknown format '{}' (use table or json)", other),
    };

    match cli.command {
        Commands::Recommend { device, pin, range, suggest } => {
            recommend(&config, device, &pin, range, suggest, json).await?;
        }

        Commands::Calibrate { device, sensor } => {
            calibrate(&config, device, sensor, json).await?;
        }

        Commands::Telemetry { device, pin, range, granularity } => {
            telemetry(&config, device, pin.as_deref(), range, granularity, json).await?;
        }

        Commands::Stats { device, range } => {
            stats(&config, device, range, json).await?;
        }

        Commands::Evaluate { input, record } => {
            evaluate(&config, &input, record, json).await?;
        }

        Commands::Alerts { device, escalate } => {
            let mut alerts = replay_alerts(&config, escalate).await?;
            if let Some(device) = device {
                alerts.retain(|a| a.device_id == device);
            }
            print_alerts(&alerts, json)?;
        }

        Commands::Config { output, effective } => {
            generate_config(&config, output, effective)?;
        }
    }

    Ok(())
}

fn reporting(config: &AppConfig) -> Result<ReportingService> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = fleet::open_store(config, clock.clone(), false)?;
    Ok(ReportingService::new(store, clock))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_insufficient(what: &str, required: usize, available: usize) {
    println!(
        "Not enough history for {}: {} readings, {} required.",
        what, available, required
    );
}

async fn recommend(
    config: &AppConfig,
    device: DeviceId,
    pin: &str,
    range: TimeRange,
    suggest: bool,
    json: bool,
) -> Result<()> {
    let service = reporting(config)?;
    let recommendation = service.get_recommended_thresholds(device, pin, range).await?;
    let suggestion = if suggest {
        Some(service.get_threshold_suggestions(device, pin, range).await?)
    } else {
        None
    };

    if json {
        #[derive(Serialize)]
        struct Output {
            recommendation: Assessed<ThresholdRecommendation>,
            #[serde(skip_serializing_if = "Option::is_none")]
            suggestion: Option<Assessed<ThresholdSuggestion>>,
        }
        return print_json(&Output { recommendation, suggestion });
    }

    match recommendation {
        Assessed::Ready(rec) => {
            let s = &rec.statistics;
            println!("╭──────────────────────────────────────────────────────────╮");
            println!("│ Thresholds for device {} pin {:<28} │", device, truncate(pin, 28));
            println!("├──────────────┬──────────────────────┬────────────────────┤");
            println!("│ Band         │ Min                  │ Max                │");
            println!("├──────────────┼──────────────────────┼────────────────────┤");
            for (name, band) in [("optimal", rec.optimal), ("warning", rec.warning), ("critical", rec.critical)] {
                println!("│ {:12} │ {:>20.2} │ {:>18.2} │", name, band.min, band.max);
            }
            println!("╰──────────────┴──────────────────────┴────────────────────╯");
            println!("Policy: {:?}, confidence: {:?}", rec.policy, rec.confidence);
            println!(
                "Samples: {}  mean {:.2}  std dev {:.2}  range [{:.2}, {:.2}]",
                s.count, s.mean, s.std_dev, s.min, s.max
            );
            println!("{}", rec.reasoning);
        }
        Assessed::InsufficientData { required, available } => {
            print_insufficient("a recommendation", required, available);
        }
    }

    match suggestion {
        Some(Assessed::Ready(sug)) => {
            println!("\nSuggested bands:");
            for (name, suggested) in [
                ("conservative", &sug.conservative),
                ("moderate", &sug.moderate),
                ("sensitive", &sug.sensitive),
                ("percentile", &sug.percentile_based),
            ] {
                println!(
                    "  {:12} {}  ({})",
                    name,
                    fmt_band(suggested.band),
                    suggested.alert_frequency
                );
            }
            for warning in &sug.warnings {
                println!("  ! {}", warning);
            }
        }
        Some(Assessed::InsufficientData { required, available }) => {
            print_insufficient("suggestions", required, available);
        }
        None => {}
    }

    Ok(())
}

async fn calibrate(config: &AppConfig, device: DeviceId, sensor: Option<SensorId>, json: bool) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = fleet::open_store(config, clock.clone(), false)?;
    let service = CalibrationService::new(store, clock, config.calibration_config());

    if let Some(sensor) = sensor {
        let result = service.calibrate(device, sensor).await?;
        if json {
            return print_json(&result);
        }
        print_calibration(sensor, "", &result);
        return Ok(());
    }

    let report = service.calibrate_all_sensors(device).await?;
    if json {
        return print_json(&report);
    }

    for calibrated in &report.calibrated {
        print_calibration(calibrated.sensor_id, &calibrated.pin, &calibrated.result);
    }
    for skipped in &report.skipped {
        println!("Sensor {} ({}): skipped, {}", skipped.sensor_id, skipped.pin, skipped.reason);
    }
    for failed in &report.failed {
        println!("Sensor {} ({}): failed, {}", failed.sensor_id, failed.pin, failed.error);
    }
    println!(
        "\nCalibrated {}, skipped {}, failed {}",
        report.calibrated.len(),
        report.skipped.len(),
        report.failed.len()
    );

    Ok(())
}

fn print_calibration(sensor: SensorId, pin: &str, result: &CalibrationResult) {
    println!(
        "Sensor {} {}: {:?} calibration, {:?} confidence, {} samples, thresholds [{}, {}]",
        sensor,
        pin,
        result.method,
        result.confidence,
        result.sample_count,
        fmt_opt(result.min_threshold),
        fmt_opt(result.max_threshold)
    );
    if let Some(hourly) = &result.hourly_thresholds {
        for (hour, band) in hourly {
            println!("  {:02}:00  {}", hour, fmt_band(*band));
        }
    }
}

async fn telemetry(
    config: &AppConfig,
    device: DeviceId,
    pin: Option<&str>,
    range: TimeRange,
    granularity: Granularity,
    json: bool,
) -> Result<()> {
    let points = reporting(config)?
        .get_historical_telemetry(device, pin, range, granularity)
        .await?;

    if json {
        return print_json(&points);
    }
    if points.is_empty() {
        println!("No telemetry in the last {}.", range);
        return Ok(());
    }

    println!("╭──────────────────────┬────────────┬────────┬────────────┬────────────┬────────────╮");
    println!("│ Bucket               │ Pin        │ Count  │ Min        │ Avg        │ Max        │");
    println!("├──────────────────────┼────────────┼────────┼────────────┼────────────┼────────────┤");
    for point in &points {
        println!(
            "│ {:20} │ {:10} │ {:>6} │ {:>10.2} │ {:>10.2} │ {:>10.2} │",
            point.bucket.format("%Y-%m-%d %H:%M:%S"),
            truncate(&point.pin, 10),
            point.count,
            point.min,
            point.avg,
            point.max
        );
    }
    println!("╰──────────────────────┴────────────┴────────┴────────────┴────────────┴────────────╯");

    Ok(())
}

async fn stats(config: &AppConfig, device: DeviceId, range: TimeRange, json: bool) -> Result<()> {
    let stats = reporting(config)?.get_device_stats(device, range).await?;

    if json {
        return print_json(&stats);
    }

    println!("Device {} ({}), status {:?}", stats.device.id, stats.device.name, stats.device.status);
    println!(
        "Window {} .. {} ({})",
        stats.from.format("%Y-%m-%d %H:%M"),
        stats.to.format("%Y-%m-%d %H:%M"),
        stats.range
    );
    println!("╭────────────┬──────────────┬──────────┬────────────┬────────────┬────────────╮");
    println!("│ Pin        │ Type         │ Readings │ Latest     │ Mean       │ Std dev    │");
    println!("├────────────┼──────────────┼──────────┼────────────┼────────────┼────────────┤");
    for sensor in &stats.sensors {
        let (mean, sd) = sensor
            .statistics
            .map_or((String::from("-"), String::from("-")), |s| {
                (format!("{:.2}", s.mean), format!("{:.2}", s.std_dev))
            });
        println!(
            "│ {:10} │ {:12} │ {:>8} │ {:>10} │ {:>10} │ {:>10} │",
            truncate(&sensor.pin, 10),
            truncate(&sensor.sensor_type, 12),
            sensor.reading_count,
            fmt_opt(sensor.latest),
            mean,
            sd
        );
    }
    println!("╰────────────┴──────────────┴──────────┴────────────┴────────────┴────────────╯");
    println!("\nTotal readings: {}, active alerts: {}", stats.total_readings, stats.active_alerts);

    Ok(())
}

async fn evaluate(config: &AppConfig, input: &Path, record: bool, json: bool) -> Result<()> {
    let lines: Vec<String> = if input.as_os_str() == "-" {
        std::io::stdin().lock().lines().collect::<std::io::Result<_>>()?
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("reading {:?}", input))?
            .lines()
            .map(str::to_string)
            .collect()
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = fleet::open_store(config, clock.clone(), record)?;
    let evaluator = RuleEvaluator::new(store, clock, config.evaluator_config());

    let mut outcomes = Vec::new();
    for (number, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let batch: IngestBatch = serde_json::from_str(line)
            .with_context(|| format!("line {} is not a valid batch", number + 1))?;
        let outcome = evaluator.process_reading(batch.device_id, batch.readings).await?;
        outcomes.push(outcome);
    }

    if json {
        return print_json(&outcomes);
    }

    let alerts: Vec<Alert> = outcomes.iter().flat_map(|o| o.alerts.iter().cloned()).collect();
    println!(
        "Batches: {}  stored: {}  rule checks: {}  skipped: {}  deduplicated: {}",
        outcomes.len(),
        outcomes.iter().map(|o| o.stored).sum::<usize>(),
        outcomes.iter().map(|o| o.evaluated).sum::<usize>(),
        outcomes.iter().map(|o| o.skipped).sum::<usize>(),
        outcomes.iter().map(|o| o.deduplicated).sum::<usize>()
    );
    for failure in outcomes.iter().flat_map(|o| &o.failures) {
        println!("  failed: pin {} rule {}: {}", failure.pin, fmt_opt(failure.rule_id), failure.error);
    }
    print_alerts(&alerts, false)
}

fn incoming(reading: &Reading) -> IncomingReading {
    IncomingReading {
        pin: reading.pin.clone(),
        sensor_type: reading.sensor_type.clone(),
        raw_value: Some(reading.raw_value),
        processed_value: Some(reading.processed_value),
        name: None,
        timestamp: Some(reading.timestamp),
        metadata: reading.metadata.clone(),
    }
}

/// Re-run the journal in timestamp order on a manual clock so dedup
/// windows and escalation delays line up with when readings arrived.
async fn replay_alerts(config: &AppConfig, escalate: bool) -> Result<Vec<Alert>> {
    let readings = fleet::journal_readings(config)?;
    let Some(first) = readings.first() else {
        return Ok(Vec::new());
    };

    let clock = Arc::new(ManualClock::new(first.timestamp));
    let store = Arc::new(fleet::seeded_store(config, clock.clone())?);
    let evaluator = RuleEvaluator::new(store.clone(), clock.clone(), config.evaluator_config());
    let engine = EscalationEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(config.dispatcher()),
        clock.clone(),
        config.escalation_config(),
    );

    for reading in &readings {
        clock.set(reading.timestamp);
        if let Err(e) = evaluator.process_reading(reading.device_id, vec![incoming(reading)]).await {
            tracing::debug!(device_id = reading.device_id, error = %e, "Replayed reading rejected");
        }
        if escalate {
            engine.run_tick().await?;
        }
    }

    let mut alerts = store.active_alerts(None).await?;
    alerts.sort_by_key(|a| (a.created_at, a.id));
    Ok(alerts)
}

fn print_alerts(alerts: &[Alert], json: bool) -> Result<()> {
    if json {
        return print_json(&alerts);
    }
    if alerts.is_empty() {
        println!("No alerts.");
        return Ok(());
    }

    println!("╭───────┬─────────────────────┬────────┬──────────┬───────┬──────────────────────────────────────────╮");
    println!("│ Alert │ Created             │ Device │ Severity │ Level │ Message                                  │");
    println!("├───────┼─────────────────────┼────────┼──────────┼───────┼──────────────────────────────────────────┤");
    for alert in alerts {
        println!(
            "│ {:>5} │ {:19} │ {:>6} │ {:8} │ {:>5} │ {:40} │",
            alert.id,
            alert.created_at.format("%Y-%m-%d %H:%M:%S"),
            alert.device_id,
            alert.severity.as_str(),
            alert.escalation_level,
            truncate(&alert.message, 40)
        );
    }
    println!("╰───────┴─────────────────────┴────────┴──────────┴───────┴──────────────────────────────────────────╯");
    println!("\nTotal alerts: {}", alerts.len());

    Ok(())
}

fn generate_config(config: &AppConfig, output: Option<PathBuf>, effective: bool) -> Result<()> {
    if effective {
        println!("# Loaded from {:?}", config.config_path);
        println!("# Escalation every {:?}", config.escalation_config().interval);
        match config.calibration_interval() {
            Some(every) => println!("# Calibration every {:?}", every),
            None => println!("# Scheduled calibration disabled"),
        }
        let evaluator = config.evaluator_config();
        println!(
            "# Rule cache {}s, dedup window {}s",
            evaluator.rule_cache_ttl.num_seconds(),
            evaluator.dedup_window.num_seconds()
        );
        println!("# Channels: {:?}", config.dispatcher().methods());
        println!("{}", toml::to_string_pretty(config)?);
        return Ok(());
    }

    let example = AppConfig::example()?;
    if let Some(path) = output {
        std::fs::write(&path, example)?;
        println!("Configuration written to: {:?}", path);
    } else {
        println!("{}", example);
    }

    Ok(())
}

fn fmt_band(band: Band) -> String {
    format!("[{:.2}, {:.2}]", band.min, band.max)
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("CO₂ sensor on the roof", 10), "CO₂ sen...");
    }

    #[test]
    fn cli_parses_ranges_and_granularity() {
        let cli = Cli::try_parse_from([
            "fieldwatch-cli",
            "telemetry",
            "--device",
            "4",
            "--range",
            "7d",
            "--granularity",
            "daily",
        ])
        .unwrap();
        match cli.command {
            Commands::Telemetry { device, range, granularity, pin } => {
                assert_eq!(device, 4);
                assert_eq!(range, TimeRange::LastWeek);
                assert_eq!(granularity, Granularity::Daily);
                assert!(pin.is_none());
            }
            _ => panic!("expected telemetry"),
        }

        assert!(Cli::try_parse_from(["fieldwatch-cli", "stats", "-d", "1", "-r", "2w"]).is_err());
    }

    #[tokio::test]
    async fn replay_rebuilds_alerts_from_journal() {
        let dir = tempfile::tempdir().unwrap();
        let fleet_file = dir.path().join("fleet.toml");
        std::fs::write(
            &fleet_file,
            r#"
            [[devices]]
            id = 1
            name = "cold room"

            [[sensors]]
            id = 10
            device_id = 1
            pin = "D4"
            sensor_type = "temperature"
            name = "probe"

            [[rules]]
            id = 100
            device_sensor_id = 10
            condition_kind = "greater_than"
            threshold_max = 8.0
            severity = "critical"
            "#,
        )
        .unwrap();
        let config = AppConfig {
            fleet_file: fleet_file.display().to_string(),
            data_directory: dir.path().join("data").display().to_string(),
            ..Default::default()
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = fleet::open_store(&config, clock.clone(), true).unwrap();
        let evaluator = RuleEvaluator::new(store.clone(), clock, config.evaluator_config());
        let start = chrono::Utc::now() - chrono::Duration::hours(1);
        // Two violations 2 minutes apart fold into one alert, the third is
        // past the dedup window
        for (minutes, value) in [(0, 4.0), (10, 9.5), (12, 9.7), (30, 10.2)] {
            let reading = IncomingReading::raw("D4", "temperature", value)
                .at(start + chrono::Duration::minutes(minutes));
            evaluator.process_reading(1, vec![reading]).await.unwrap();
        }
        drop(evaluator);
        drop(store);

        let alerts = replay_alerts(&config, false).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.device_id == 1 && a.rule_id == Some(100)));
    }
}
