//! Main entry point for the ads-sync CLI

use anyhow::Context;
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use ads_sync_engine::auth::RotationWriter;
use ads_sync_engine::cli::Cli;
use ads_sync_engine::metrics::init_metrics;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ads_sync_engine=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
    }

    let engine = cli.build_engine()?;
    let rotation_writer = RotationWriter::spawn(engine.credentials(), cli.refresh_token_file.clone());

    tokio::spawn({
        let shutdown = engine.shutdown().clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - finishing in-flight work, no new calls");
                shutdown.request_shutdown();
            }
        }
    });

    let result = cli.execute(&engine).await;
    // A token rotated during the run must reach disk before the process exits.
    rotation_writer.finish().await;
    result?;
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
