//! Tracing setup.
//!
//! `RUST_LOG` wins when set; otherwise the level comes from `-v` flags.
//! Logs go to stderr so stdout stays free for response bodies, or to a
//! file when one is given.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_directive(verbosity: u8) -> &'static str {
  match verbosity {
    0 => "warn",
    1 => "info",
    _ => "debug",
  }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit or buffered file logs are lost.
pub fn init(verbosity: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

  let Some(path) = log_file else {
    tracing_subscriber::registry()
      .with(fmt::layer().with_writer(std::io::stderr))
      .with(filter)
      .try_init()?;
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .try_init()?;

  Ok(Some(guard))
}
