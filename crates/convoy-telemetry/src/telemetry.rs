use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use fastrace::collector::{Config, Reporter, SpanRecord};
use log::debug;

use crate::error::{TelemetryError, TelemetryResult};

enum TelemetryStatus {
    Uninitialized,
    Initialized,
}

static TELEMETRY_STATUS: Mutex<TelemetryStatus> = Mutex::new(TelemetryStatus::Uninitialized);

/// Installs the process-wide logger and span reporter.
/// The log filter is read from `RUST_LOG` and defaults to `info`.
pub fn init_telemetry() -> TelemetryResult<()> {
    let mut status = TELEMETRY_STATUS
        .lock()
        .map_err(|e| TelemetryError::internal(e.to_string()))?;
    match *status {
        TelemetryStatus::Uninitialized => {
            init_logs()?;
            init_traces();
            debug!("telemetry initialized");
            *status = TelemetryStatus::Initialized;
            Ok(())
        }
        TelemetryStatus::Initialized => {
            Err(TelemetryError::internal("telemetry already initialized"))
        }
    }
}

fn init_logs() -> TelemetryResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            let level = record.level();
            let target = record.target();
            let style = buf.default_level_style(level);
            let timestamp = buf.timestamp();
            let args = record.args();
            writeln!(buf, "[{timestamp} {style}{level}{style:#} {target}] {args}")
        })
        .try_init()
        .map_err(|e| TelemetryError::internal(e.to_string()))
}

fn init_traces() {
    // Spans are collected but not exported until an exporter is configured.
    let config = Config::default().report_interval(Duration::MAX);
    fastrace::set_reporter(NoOpReporter, config);
}

/// A fastrace reporter that does nothing.
struct NoOpReporter;

impl Reporter for NoOpReporter {
    fn report(&mut self, _spans: Vec<SpanRecord>) {}
}
