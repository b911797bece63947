mod logging;
mod supervisor;

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use wrapguard_core::WrapguardConfig;

use crate::supervisor::Supervisor;

/// Real-time safety and production-tracking supervisor for the two wrapping
/// machines (§1).
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "wrapguard.toml")]
    config: PathBuf,

    /// Directory for the rotated log file and the SQLite event store.
    #[arg(long, default_value = "state")]
    state_dir: PathBuf,

    /// Raise the default log level from info to debug (ignored if RUST_LOG is set).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let _log_guard = logging::init(&args.state_dir, args.verbose)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("wrapguard-worker")
        .build()?;

    let exit_code = runtime.block_on(run(args));
    std::process::exit(exit_code);
}

async fn run(args: CliArgs) -> i32 {
    let config = match WrapguardConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, path = %args.config.display(), "failed to load configuration");
            return 1;
        }
    };

    let cancel = CancellationToken::new();
    let db_path = args.state_dir.join("events.db");

    let sup = match Supervisor::start(&config, &db_path, cancel).await {
        Ok(sup) => sup,
        Err(e) => {
            error!(error = %e, "failed to start supervisor, aborting");
            return 1;
        }
    };

    info!("wrapguard supervisor running, press ctrl-c to stop");
    wait_for_stop_signal().await;

    info!("stop requested, shutting down stages");
    sup.shutdown().await;
    info!("shutdown complete");
    0
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
