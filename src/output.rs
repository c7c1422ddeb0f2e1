// Per-estimate output sinks
//
// The engine publishes every estimate on a broadcast channel; sinks run in
// their own task, so file writes never sit on the ingest path.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::estimators::LocationEstimate;

/// An estimate produced for a subject, as published by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateEvent {
    pub subject: String,
    pub estimate: LocationEstimate,
}

/// Feed published estimates to every handler until the engine goes away.
pub async fn run_outputs(
    mut rx: broadcast::Receiver<EstimateEvent>,
    mut handlers: Vec<Box<dyn OutputHandler>>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                for handler in handlers.iter_mut() {
                    handler.handle_estimate(&event.subject, &event.estimate);
                }
            }
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!("Outputs lagged, {} estimates dropped", count);
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("Output channel closed");
                return;
            }
        }
    }
}

/// Trait for output handlers
pub trait OutputHandler: Send + Sync {
    /// Handle a newly produced estimate for a subject
    fn handle_estimate(&mut self, subject: &str, estimate: &LocationEstimate);
}

/// One log line per estimate
#[derive(Debug, Default)]
pub struct LogOutput;

impl LogOutput {
    pub fn new() -> Self {
        LogOutput
    }
}

impl OutputHandler for LogOutput {
    fn handle_estimate(&mut self, subject: &str, estimate: &LocationEstimate) {
        info!(
            subject,
            method = %estimate.method,
            cells = estimate.measurements_used.len(),
            "Subject located at lat {:.6}, lon {:.6}, precision {:.2}",
            estimate.latitude,
            estimate.longitude,
            estimate.precision
        );
    }
}

/// CSV format output
pub struct CsvOutput {
    writer: BufWriter<std::fs::File>,
}

impl CsvOutput {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(CsvOutput {
            writer: BufWriter::new(file),
        })
    }

    /// Format: produced_at,subject,lat,lon,precision,method
    pub fn format_line(subject: &str, estimate: &LocationEstimate) -> String {
        format!(
            "{},{},{:.6},{:.6},{:.4},{}",
            estimate.produced_at.to_rfc3339(),
            subject,
            estimate.latitude,
            estimate.longitude,
            estimate.precision,
            estimate.method
        )
    }
}

impl OutputHandler for CsvOutput {
    fn handle_estimate(&mut self, subject: &str, estimate: &LocationEstimate) {
        let line = Self::format_line(subject, estimate);
        if let Err(e) = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush()) {
            error!("Failed to write CSV: {}", e);
        }
    }
}
