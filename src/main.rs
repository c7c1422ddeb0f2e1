// Cell locator - replay decoded cell measurements through the estimation engine
// Licensed under AGPL v3

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};

use cell_locator::cell::MeasurementRecord;
use cell_locator::clock::{Clock, ManualClock, SystemClock};
use cell_locator::config::Config;
use cell_locator::directory::CellDatabase;
use cell_locator::engine::Engine;
use cell_locator::output::{run_outputs, CsvOutput, LogOutput, OutputHandler};
use cell_locator::report::write_report;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_logging(config.verbose);

    info!("Starting cell locator");

    let directory = load_directory(config.cell_database.as_deref());

    // Replay drives the clock from record timestamps
    let manual_clock = config
        .replay
        .then(|| Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH)));
    let clock: Arc<dyn Clock> = match &manual_clock {
        Some(c) => c.clone(),
        None => Arc::new(SystemClock),
    };

    let engine = Arc::new(Engine::new(Arc::new(directory), clock));

    let mut handlers: Vec<Box<dyn OutputHandler>> = vec![Box::new(LogOutput::new())];
    for filename in &config.write_csv {
        info!("Writing CSV results to {}", filename);
        match CsvOutput::new(filename) {
            Ok(csv_out) => handlers.push(Box::new(csv_out)),
            Err(e) => error!("Failed to open CSV output file {}: {}", filename, e),
        }
    }
    let outputs = tokio::spawn(run_outputs(engine.subscribe(), handlers));

    let periodic_engine = engine.clone();
    let periodic_config = config.clone();
    let periodic = tokio::spawn(async move {
        run_periodic(periodic_engine, periodic_config).await;
    });

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &config.input {
        Some(path) => {
            info!("Reading measurements from {}", path);
            Box::new(BufReader::new(tokio::fs::File::open(path).await?))
        }
        None => {
            info!("Reading measurements from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };

    tokio::select! {
        result = process_input(&engine, reader, manual_clock.as_deref()) => match result {
            Ok(stats) => info!(
                "Input exhausted: {} records, {} rejected, {} estimates",
                stats.records, stats.rejected, stats.estimates
            ),
            Err(e) => error!("Failed to read input: {}", e),
        },
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
                return Err(err.into());
            }
        },
    }

    info!("Shutting down...");
    periodic.abort();
    let _ = periodic.await;

    engine.log_status().await;
    if let Some(path) = &config.export_report {
        export_report(&engine, path).await;
    }
    info!("Stopped. Total estimates: {}", engine.total_estimates().await);

    // Last engine handle: closing the channel lets the outputs drain and exit
    drop(engine);
    if let Err(e) = outputs.await {
        error!("Output task failed: {}", e);
    }

    Ok(())
}

#[derive(Debug, Default)]
struct InputStats {
    records: usize,
    rejected: usize,
    estimates: usize,
}

/// Feed every JSON line into the engine until end of input.
async fn process_input(
    engine: &Engine,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    manual_clock: Option<&ManualClock>,
) -> std::io::Result<InputStats> {
    let mut stats = InputStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.records += 1;

        let record: MeasurementRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping line {}: {}", line_no, e);
                stats.rejected += 1;
                continue;
            }
        };

        if let Some(clock) = manual_clock {
            clock.advance_to(record.measurement.observed_at);
        }

        match engine.ingest(&record.subject, record.measurement).await {
            Ok(Some(_)) => stats.estimates += 1,
            Ok(None) => {}
            Err(e) => {
                warn!("Rejected measurement on line {} for {}: {}", line_no, record.subject, e);
                stats.rejected += 1;
            }
        }
    }

    Ok(stats)
}

/// Status log, report export and idle-subject sweep on their own schedules.
async fn run_periodic(engine: Arc<Engine>, config: Config) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let status_secs = config.status_interval;
    let mut next_status = (status_secs > 0)
        .then(|| tokio::time::Instant::now() + Duration::from_secs(status_secs as u64));

    let export_secs = config.export_interval.max(1);
    let mut next_export = config
        .export_report
        .as_ref()
        .map(|_| tokio::time::Instant::now() + Duration::from_secs(export_secs));

    let sweep_secs = 60u64;
    let mut next_sweep = tokio::time::Instant::now() + Duration::from_secs(sweep_secs);

    loop {
        ticker.tick().await;
        let now = tokio::time::Instant::now();

        if let Some(next) = next_status.as_mut() {
            if now >= *next {
                *next += Duration::from_secs(status_secs as u64);
                engine.log_status().await;
            }
        }
        if let (Some(next), Some(path)) = (next_export.as_mut(), config.export_report.as_ref()) {
            if now >= *next {
                *next += Duration::from_secs(export_secs);
                export_report(&engine, path).await;
            }
        }
        if now >= next_sweep {
            next_sweep += Duration::from_secs(sweep_secs);
            engine.sweep().await;
        }
    }
}

async fn export_report(engine: &Engine, path: &str) {
    let report = engine.report().await;
    match write_report(path, &report) {
        Ok(()) => debug!("Report written to {}", path),
        Err(e) => error!("Failed to export report: {}", e),
    }
}

/// Load the tower database; a missing or broken database degrades to empty.
fn load_directory(path: Option<&str>) -> CellDatabase {
    let Some(path) = path else {
        warn!("No cell database given, no tower positions are known");
        return CellDatabase::new();
    };
    match CellDatabase::load(path) {
        Ok(db) => {
            info!("Loaded {} tower positions from {}", db.len(), path);
            db
        }
        Err(e) => {
            warn!("{}; continuing with an empty cell database", e);
            CellDatabase::new()
        }
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
