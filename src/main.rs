#![forbid(unsafe_code)]

//! `agent-backbone`: keeps one supervised session to the control plane.
//!
//! Loads configuration, dials the control plane under a root kernel, runs
//! the liveness monitor beside it, and exits when told to stop or when the
//! session breaks.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_backbone::api::{self, LivenessMonitor};
use agent_backbone::config::GlobalConfig;
use agent_backbone::supervisor::Kernel;
use agent_backbone::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-backbone", about = "Supervised control-plane session", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-backbone bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    let config = Arc::new(config);
    info!("configuration loaded");

    let root = Kernel::invoke("agent", move |kernel| agent(kernel, config));
    let root_dying = root.dying();

    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            root.kill(None);
        }
        () = root_dying.closed() => {}
    }

    match root.wait().await {
        Ok(()) => {
            info!("agent-backbone shut down");
            Ok(())
        }
        Err(err) => {
            error!(%err, "agent stopped with error");
            Err(err)
        }
    }
}

/// Root task: own the session and stop on kill or breakage.
async fn agent(kernel: Kernel, config: Arc<GlobalConfig>) -> Result<()> {
    let endpoints = config.endpoints()?;
    let opts = config.dial_options();
    let dying = kernel.dying();

    let session = tokio::select! {
        () = dying.closed() => return Err(Kernel::err_dying()),
        session = api::dial(&endpoints, &opts) => session?,
    };

    let monitor = LivenessMonitor::start(session.clone(), config.liveness());
    if let Err(err) = kernel.register(Arc::new(monitor)) {
        session.close().await;
        return Err(err);
    }
    info!(session = session.name(), "session established");

    let broken = session.broken();
    let outcome = tokio::select! {
        () = dying.closed() => Err(Kernel::err_dying()),
        () = broken.closed() => {
            warn!(session = session.name(), "session broken, stopping agent");
            Err(AppError::Broken)
        }
    };

    session.close().await;
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
