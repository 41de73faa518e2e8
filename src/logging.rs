//! Tracing subscriber setup.
//!
//! Console output is always on and filtered by `RUST_LOG` when set, otherwise
//! by `log_level` from the configuration. When `log_file_folder` names an
//! existing directory, every event is also written as one JSON object per
//! line to a daily rolling `latencylog.json` file in that folder.

use crate::config::Config;
use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "latencylog.json";

fn env_filter(level: &str) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {}", EnvFilter::DEFAULT_ENV)),
        _ => EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'")),
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer when dropped and must be held
/// until the process exits.
pub fn init(config: &Config) -> Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_target(false)
        .with_filter(env_filter(&config.log_level)?);

    let folder = config.log_file_folder.as_deref().filter(|folder| folder.is_dir());
    let (file, guard) = match folder {
        Some(folder) => {
            let appender = tracing_appender::rolling::daily(folder, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer)
                .with_filter(env_filter(&config.log_level)?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("failed to install tracing subscriber")?;

    match (&config.log_file_folder, folder) {
        (_, Some(folder)) => info!("Writing JSON logs to {}", folder.join(LOG_FILE_NAME).display()),
        (Some(missing), None) => warn!(
            "Log file folder {} does not exist, only console logging is active.",
            missing.display()
        ),
        (None, None) => info!("No log file folder configured, only console logging is active."),
    }

    Ok(guard)
}
