//! corrstack - development stack supervisor for the correlation engine
//!
//! Launches the API server, frontend dev server, and dashboard, waits for
//! each to become ready, monitors aggregate health, and shuts everything
//! down cleanly on SIGINT/SIGTERM.

// Core modules (config, errors, events, log buffering)
mod core;
// Health probing and monitoring
mod health;
// Child process management
mod process;
// Shutdown signaling and teardown
mod shutdown;
// Orchestration
mod supervisor;
// Workflow tracking
mod workflow;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::core::Config;
use crate::supervisor::Supervisor;

/// Development stack supervisor
#[derive(Parser, Debug)]
#[command(name = "corrstack")]
#[command(version = "0.1.0")]
#[command(about = "Launch and supervise the correlation engine development stack")]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trigger the demo workflow once the stack is healthy
    #[arg(long)]
    demo: bool,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    init_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "corrstack=debug"
    } else {
        "corrstack=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.init_config {
        let path = cli.config.clone().unwrap_or_else(Config::default_path);
        Config::default().save(Some(path.clone()))?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = Config::load(cli.config)?;

    let mut supervisor = Supervisor::new(config, cli.demo)?;
    if let Err(e) = supervisor.run().await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
