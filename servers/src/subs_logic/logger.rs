use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "server_subs";

/// Builds the filter: `RUST_LOG` wins, `log_level` otherwise.
pub fn build_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("invalid log level '{}'", log_level))
}

/// Installs the global subscriber. Console output is always on; with a
/// `log_dir` a JSON daily-rolling file is added and the returned guard must be
/// held until shutdown so buffered lines get flushed.
pub fn setup_logging(log_dir: Option<&Path>, log_level: &str) -> Result<Option<WorkerGuard>> {
    let env_filter = build_filter(log_level)?;
    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let (writer, guard) = non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing the global tracing subscriber")?;

    match log_dir {
        Some(dir) => info!(level = log_level, dir = %dir.display(), "logging initialized"),
        None => info!(level = log_level, "logging initialized (console only)"),
    }
    Ok(guard)
}
