#![forbid(unsafe_code)]

//! `agent-backbone-ctl`: diagnostic companion for `agent-backbone`.
//!
//! Opens an unauthenticated session to the configured control plane and
//! probes it. No credentials are loaded or sent.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use agent_backbone::api::{self, DialOptions};
use agent_backbone::config::GlobalConfig;
use agent_backbone::Result;

#[derive(Debug, Parser)]
#[command(
    name = "agent-backbone-ctl",
    about = "Diagnostics for the agent-backbone control-plane session",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Give up dialing after this many seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dial the control plane and issue one liveness probe.
    Ping,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    if let Err(err) = run(&args).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: &Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    let endpoints = config.anonymous_endpoints()?;
    let opts = DialOptions {
        timeout: Duration::from_secs(args.timeout),
        ..config.dial_options()
    };

    match args.command {
        Command::Ping => {
            let session = api::dial(&endpoints, &opts).await?;
            let started = Instant::now();
            let outcome = session.ping().await;
            let elapsed = started.elapsed();
            session.close().await;
            outcome?;
            println!("{}: pong in {elapsed:?}", session.name());
        }
    }

    Ok(())
}
