//! AppSec helper binary.
//!
//! Serves rule evaluation to runtime extensions over a Unix socket.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use appsec_helper::HelperConfig;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// AppSec helper.
#[derive(Parser, Debug)]
#[command(name = "appsec-helper")]
#[command(about = "Evaluate AppSec rules for runtime extensions")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Unix socket to listen on.
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Lock file guarding against a second instance.
    #[arg(long, value_name = "PATH")]
    lock: Option<PathBuf>,

    /// Write logs to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = HelperConfig::load(cli.config.as_deref());
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }
    if let Some(lock) = cli.lock {
        config.lock_path = lock;
    }
    if let Some(log_file) = cli.log_file {
        config.log_file = Some(log_file);
    }

    init_tracing(&config, cli.verbose)?;

    info!(version = appsec_helper::VERSION, "AppSec helper starting");
    if let Err(e) = loaded {
        info!(error = %e, "Failed to load config, using defaults");
    }

    info!(
        socket = %config.socket_path.display(),
        lock = %config.lock_path.display(),
        max_connections = config.max_connections,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel_on_signal.cancel();
    });

    if let Err(e) = appsec_helper::run(&config, cancel).await {
        error!(error = %e, "Helper error");
        return Err(e.into());
    }

    info!("AppSec helper shutdown complete");
    Ok(())
}

fn init_tracing(config: &HelperConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
