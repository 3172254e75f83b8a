use color_eyre::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "vigia=info";

/// Install the global subscriber: stderr plus a daily rolling file in
/// `log_dir` when one is given.
///
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive
/// until exit so buffered file output is flushed.
pub fn init(log_dir: Option<&Path>, verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter = match EnvFilter::try_from_default_env() {
    Ok(filter) => filter,
    Err(_) => EnvFilter::try_new(if verbose { "vigia=debug" } else { DEFAULT_FILTER })?,
  };

  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let (file, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)?;
      let appender = tracing_appender::rolling::daily(dir, "vigia.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(file)
    .try_init()?;

  Ok(guard)
}
