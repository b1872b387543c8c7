//! Logging setup.
//!
//! Console output always; daily rolling file output when a log directory is
//! configured. Timestamps use the server's local timezone.

use chrono::Local;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "pagelinks=info,sqlx=warn,tower_http=info";

/// Log file name prefix inside the log directory.
const LOG_FILE_NAME: &str = "pagelinks.log";

/// Timer that formats timestamps in the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Build the filter from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initialize the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; it must be
/// kept alive for the lifetime of the process.
pub fn init_logging(log_dir: Option<&str>) -> crate::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir.map(str::trim).filter(|d| !d.is_empty()) {
        Some(dir) => {
            let log_path = PathBuf::from(dir);
            std::fs::create_dir_all(&log_path)?;

            let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}
