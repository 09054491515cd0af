//! Face Identity Service - Main Entry Point

use anyhow::Context;
use clap::Parser;
use face_service::{init_logging, init_metrics, run_service, ServiceConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "face-id-service",
    version,
    about = "Resolves camera face events to enrolled identities",
    long_about = None
)]
struct Args {
    /// Configuration file (defaults to config/face-service.* when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    init_logging(&config.logging)?;

    info!("=== Face Identity Service v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Subscribing to {:?} on {}:{}",
        config.mqtt.topics, config.mqtt.host, config.mqtt.port
    );

    if let Some(listen) = &config.metrics.listen {
        init_metrics(listen)?;
    }

    run_service(config).await?;
    Ok(())
}
