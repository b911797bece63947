use std::path::Path;

use tracing_subscriber::fmt::{self, format, time};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initializes the process-wide subscriber: compact, uptime-timed console
/// output plus a never-rotated file stream under `log_dir` (one file per
/// supervisor run; operators rotate externally). `-v` raises the default
/// filter from `info` to `debug` when `RUST_LOG` isn't set.
pub fn init(log_dir: &Path, verbose: u8) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "wrapguard-supervisor.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose > 0 { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_fmt = format().with_timer(time::Uptime::default()).compact();
    let file_fmt = format().with_timer(time::Uptime::default());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().event_format(console_fmt))
        .with(fmt::layer().event_format(file_fmt).with_writer(non_blocking))
        .init();

    Ok(guard)
}
