use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config;

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

/// Install the global tracing subscriber for a host component
///
/// Logs go to stdout, and additionally to `<data dir>/logs/<component>.log`
/// when `to_file` is set. Keep the returned guard alive until shutdown so
/// buffered file output is flushed.
pub fn init_logging(component: &str, to_file: bool) -> io::Result<Option<WorkerGuard>> {
    if !to_file {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .try_init()
            .map_err(io::Error::other)?;
        return Ok(None);
    }

    let log_dir = log_directory()?;
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(format!("{component}.log"));
    truncate_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(io::stdout))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!(target: "scripting", "Logging to file: {}", log_path.display());
    Ok(Some(guard))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn log_directory() -> io::Result<PathBuf> {
    config::data_dir()
        .map(|dir| dir.join("logs"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))
}

/// Start the log over once it grows past `MAX_LOG_SIZE`
fn truncate_if_needed(path: &Path) -> io::Result<()> {
    if path.exists() && fs::metadata(path)?.len() > MAX_LOG_SIZE {
        File::create(path)?;
    }
    Ok(())
}
