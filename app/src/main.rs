//! FieldWatch Alerting Daemon
//!
//! Reads device batches as JSON lines on stdin, evaluates them against the
//! fleet's rules, escalates open alerts on a schedule and periodically
//! recalibrates sensor thresholds.

use anyhow::Result;
use clap::Parser;
use fieldwatch_sensors::{CalibrationService, EscalationEngine, RuleEvaluator};
use fieldwatch_store::{Clock, MemoryStore, SystemClock};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

mod config;
mod fleet;
mod logging;

use config::AppConfig;
use fleet::IngestBatch;

/// Lines buffered between the stdin reader thread and the evaluator
const INGEST_QUEUE: usize = 256;

#[derive(Parser)]
#[command(name = "fieldwatch")]
#[command(version)]
#[command(about = "FieldWatch sensor alerting daemon", long_about = None)]
struct Args {
    /// Configuration file (defaults to the standard search path)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::resolve(args.config.as_deref())?;

    logging::init(&config, logging::DAEMON_FILTER, BoxMakeWriter::new(std::io::stdout));

    tracing::info!("╔══════════════════════════════════════════╗");
    tracing::info!("║        FieldWatch Alerting Daemon        ║");
    tracing::info!("║            Version {:<22}║", env!("CARGO_PKG_VERSION"));
    tracing::info!("╚══════════════════════════════════════════╝");
    tracing::info!("Configuration loaded from {:?}", config.config_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = fleet::open_store(&config, clock.clone(), config.journal_readings)?;

    let evaluator = Arc::new(RuleEvaluator::new(
        store.clone(),
        clock.clone(),
        config.evaluator_config(),
    ));
    let escalation = EscalationEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(config.dispatcher()),
        clock.clone(),
        config.escalation_config(),
    );
    let calibration = Arc::new(CalibrationService::new(
        store.clone(),
        clock.clone(),
        config.calibration_config(),
    ));

    let cancel = CancellationToken::new();

    let ingest_task = tokio::spawn(run_ingest(stdin_lines(), evaluator, cancel.clone()));

    let escalation_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { escalation.run(cancel).await })
    };

    let calibration_task = config.calibration_interval().map(|every| {
        tokio::spawn(run_calibration(calibration, store.clone(), every, cancel.clone()))
    });
    if calibration_task.is_none() {
        tracing::info!("Scheduled calibration disabled");
    }

    print_status(&config);
    tracing::info!("FieldWatch is accepting readings on stdin");
    tracing::info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Running ticks and batches finish before their loops observe this
    cancel.cancel();

    let stats = ingest_task.await?;
    escalation_task.await?;
    if let Some(task) = calibration_task {
        task.await?;
    }

    tracing::info!(
        batches = stats.batches,
        rejected = stats.rejected,
        stored = stats.stored,
        alerts = stats.alerts,
        "FieldWatch shutdown complete"
    );

    Ok(())
}

/// Counters kept by the ingest loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct IngestStats {
    batches: usize,
    rejected: usize,
    stored: usize,
    alerts: usize,
}

/// Forward stdin lines from a dedicated thread. A blocking stdin read
/// would otherwise hold up runtime shutdown.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(INGEST_QUEUE);

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
        tracing::info!("Input closed");
    });

    rx
}

async fn run_ingest(
    mut lines: mpsc::Receiver<String>,
    evaluator: Arc<RuleEvaluator>,
    cancel: CancellationToken,
) -> IngestStats {
    let mut stats = IngestStats::default();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let batch: IngestBatch = match serde_json::from_str(line) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected malformed batch");
                stats.rejected += 1;
                continue;
            }
        };

        match evaluator.process_reading(batch.device_id, batch.readings).await {
            Ok(outcome) => {
                stats.batches += 1;
                stats.stored += outcome.stored;
                stats.alerts += outcome.alerts.len();
                for failure in &outcome.failures {
                    tracing::warn!(
                        device_id = batch.device_id,
                        pin = %failure.pin,
                        rule_id = ?failure.rule_id,
                        "Batch entry failed: {}",
                        failure.error
                    );
                }
            }
            Err(e) => {
                tracing::warn!(device_id = batch.device_id, error = %e, "Batch rejected");
                stats.rejected += 1;
            }
        }
    }

    stats
}

async fn run_calibration(
    service: Arc<CalibrationService>,
    store: Arc<MemoryStore>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!("Calibration scheduled every {:?}", every);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => calibrate_fleet(&service, &store).await,
        }
    }
}

async fn calibrate_fleet(service: &CalibrationService, store: &MemoryStore) {
    let devices = match store.devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::error!("Cannot list devices for calibration: {}", e);
            return;
        }
    };

    for device in devices {
        match service.calibrate_all_sensors(device.id).await {
            Ok(report) => tracing::debug!(
                device_id = device.id,
                calibrated = report.calibrated.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Calibrated {}",
                device.name
            ),
            Err(e) => tracing::warn!(device_id = device.id, error = %e, "Calibration run failed"),
        }
    }
}

fn print_status(config: &AppConfig) {
    tracing::info!("╭──────────────── Configuration ────────────────╮");
    tracing::info!("│ Fleet file: {:>33} │", config.fleet_file);
    tracing::info!("│ Data directory: {:>29} │", config.data_directory);
    tracing::info!("│ Journal readings: {:>27} │", config.journal_readings);
    tracing::info!("│ Escalation interval: {:>22} s │", config.escalation_interval_secs);
    tracing::info!("│ Dedup window: {:>29} s │", config.dedup_window_secs);
    tracing::info!("│ Rule cache TTL: {:>27} s │", config.rule_cache_ttl_secs);
    tracing::info!("│ Calibration every: {:>24} h │", config.calibration_interval_hours);
    tracing::info!("╰───────────────────────────────────────────────╯");
}
