//! Logging setup
//!
//! Daily log files under the data dir, swept after 7 days

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_RETENTION_DAYS: u64 = 7;
const LOG_PREFIX: &str = "zapgate";

/// Keeps the non-blocking file writer alive. Dropping it flushes and stops
/// the background writer thread.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn dated_log_path(log_dir: &Path) -> PathBuf {
    let today = chrono::Local::now().format("%Y-%m-%d");
    log_dir.join(format!("{}.{}.log", LOG_PREFIX, today))
}

/// `RUST_LOG` wins over the configured level; an unparsable level falls
/// back to `info`.
fn level_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
}

fn sweep_old_logs(log_dir: &Path) -> Result<()> {
    let cutoff = SystemTime::now() - Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    let mut removed = 0;
    for entry in fs::read_dir(log_dir)?.flatten() {
        let path = entry.path();
        let is_our_log = path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"))
                .unwrap_or(false);
        if !is_our_log {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if expired {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to delete old log {}: {}", path.display(), e),
            }
        }
    }
    if removed > 0 {
        tracing::info!("Cleaned up {} old log file(s)", removed);
    }
    Ok(())
}

pub fn init_logging(log_dir: &Path, log_level: &str) -> Result<LoggingGuard> {
    fs::create_dir_all(log_dir)?;
    sweep_old_logs(log_dir)?;

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dated_log_path(log_dir))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(level_filter(log_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_filter(level_filter(log_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(LoggingGuard { _guard: guard })
}
