// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Watchbarn - Multi-Camera Perimeter Watch System
//!
//! Headless monitoring daemon: camera capture, object tracking,
//! distance-aware alert rules, and spoken alert delivery.

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use std::path::PathBuf;

use watchbarn::{Config, Engine, VERSION};

/// Watchbarn - Multi-Camera Perimeter Watch System
#[derive(Parser, Debug)]
#[command(name = "watchbarn")]
#[command(author = "Watchbarn Project")]
#[command(version = VERSION)]
#[command(about = "Multi-camera tracking and voice alert system")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with simulated cameras and detector
    #[arg(long)]
    demo: bool,

    /// Data output directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Watchbarn v{} - Multi-Camera Perimeter Watch System", VERSION);

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!(
        "Cameras: {}, rules: {}, demo mode: {}",
        config.cameras.len(),
        config.alerts.rules.len(),
        config.demo_mode
    );

    if args.check {
        config.validate()?;
        info!("Configuration is valid");
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    use tokio::sync::broadcast;

    let engine = Engine::new(config)?;
    let (shutdown_tx, _) = broadcast::channel(1);

    // Ctrl+C triggers the drain-and-stop path
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
            }
        });
    }

    info!("🚀 Watchbarn running - press Ctrl+C to stop");
    engine.run(shutdown_tx).await?;

    info!("Watchbarn shutdown complete");
    Ok(())
}
