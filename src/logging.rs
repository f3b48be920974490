use chrono::{Local, NaiveDate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_PREFIX: &str = "credit-rag";
const ARCHIVE_RETENTION_DAYS: i64 = 30;

/// Initialize console and daily-rolling file logging under `log_dir`.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let archive_dir = log_dir.join("archive");

    fs::create_dir_all(log_dir)?;
    fs::create_dir_all(&archive_dir)?;

    // Archive old logs before starting
    archive_old_logs(log_dir, &archive_dir)?;

    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| format!("Failed to create rolling file appender: {}", e))?;
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    // Console output stays terse, to stderr so `--json` stdout is clean
    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(true)
        .without_time()
        .with_writer(io::stderr);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(non_blocking_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,credit_rag=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(log_dir = %log_dir.display(), "Logging initialized");

    if let Err(e) = cleanup_old_archives(&archive_dir) {
        tracing::warn!("Failed to cleanup old log archives during init: {}", e);
    }

    Ok(guard)
}

/// `~/.credit-rag/logs`, used when no log directory is configured.
pub fn default_log_directory() -> PathBuf {
    std::env::var("USERPROFILE")
        .or_else(|_| std::env::var("HOME"))
        .map(|home| PathBuf::from(home).join(".credit-rag").join("logs"))
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

/// Move logs older than today into the archive directory
fn archive_old_logs(log_dir: &Path, archive_dir: &Path) -> io::Result<()> {
    let today = Local::now().date_naive();

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();

        if !path.is_file() || !path.extension().map_or(false, |ext| ext == "log") {
            continue;
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        if let Some(file_date) = date_from_filename(file_name) {
            if file_date < today {
                let archive_path = archive_dir.join(file_name);
                if let Err(e) = fs::rename(&path, &archive_path) {
                    eprintln!("Failed to archive log file {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(())
}

/// Date in `credit-rag.2024-01-01.log`
fn date_from_filename(filename: &str) -> Option<NaiveDate> {
    let rest = filename.strip_prefix(LOG_PREFIX)?.strip_prefix('.')?;
    let date_part = rest.split('.').next()?;
    if date_part.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Delete archived logs past the retention window
pub fn cleanup_old_archives(archive_dir: &Path) -> io::Result<usize> {
    if !archive_dir.exists() {
        return Ok(0);
    }

    let cutoff_date = Local::now().date_naive() - chrono::Duration::days(ARCHIVE_RETENTION_DAYS);
    let mut removed = 0;

    for entry in fs::read_dir(archive_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        if let Some(file_date) = date_from_filename(file_name) {
            if file_date < cutoff_date {
                match fs::remove_file(&path) {
                    Ok(_) => {
                        removed += 1;
                        tracing::info!("Removed old archived log: {}", path.display());
                    }
                    Err(e) => tracing::warn!(
                        "Failed to remove old archived log {}: {}",
                        path.display(),
                        e
                    ),
                }
            }
        }
    }

    Ok(removed)
}
