use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogConfig;

/// Install the global subscriber.
///
/// Logs go to a daily rolling file under the configured log directory, or to
/// stderr when `to_stderr` is set or no log directory can be determined.
/// The returned guard flushes the file writer on drop and must be held until
/// exit.
pub fn init(config: &LogConfig, to_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter = build_filter(&config.filter)?;

  let dir = match config.log_dir() {
    Some(dir) if !to_stderr => dir,
    _ => {
      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      return Ok(None);
    }
  };

  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "vetemr.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(Some(guard))
}

/// `RUST_LOG` wins over the configured directives.
fn build_filter(configured: &str) -> Result<EnvFilter> {
  match std::env::var(EnvFilter::DEFAULT_ENV) {
    Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
    _ => EnvFilter::try_new(configured),
  }
  .map_err(|e| eyre!("Invalid log filter: {}", e))
}
