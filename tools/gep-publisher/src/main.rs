//! GEP Publisher Server
//!
//! Serves metadata and measurements to GEP subscribers. Devices, measurements and phasors
//! can be loaded from a TOML file.

mod config;

use anyhow::Result;
use clap::Parser;
use gep_publisher::DataPublisher;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::FileConfig;

#[derive(Parser)]
#[command(name = "gep-publisher")]
#[command(about = "GEP Data Publisher")]
#[command(version)]
struct Cli {
    /// Listen address (overrides the config file)
    #[arg(short, long)]
    listen: Option<String>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node ID (overrides the config file)
    #[arg(long)]
    node_id: Option<Uuid>,

    /// Refuse metadata refresh requests
    #[arg(long)]
    no_metadata_refresh: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut file = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            FileConfig::load(path)?
        }
        None => FileConfig::default(),
    };

    if let Some(listen) = cli.listen {
        file.publisher.listen = listen;
    }
    if let Some(node_id) = cli.node_id {
        file.publisher.node_id = Some(node_id);
    }
    if cli.no_metadata_refresh {
        file.publisher.allow_metadata_refresh = false;
    }

    let listen = file.publisher.listen.clone();
    let publisher = DataPublisher::new(file.publisher.clone())?;

    publisher.on_client_connected(|id, connection| {
        tracing::info!("Subscriber {} connected from {}", id, connection);
    });
    publisher.on_client_disconnected(|id, connection| {
        tracing::info!("Subscriber {} disconnected from {}", id, connection);
    });

    if file.has_metadata() {
        publisher.define_metadata_records(
            &file.devices,
            &file.measurements,
            &file.phasors,
            file.metadata_version,
        )?;
    }

    tracing::info!("Starting GEP publisher, node {}", publisher.node_id());
    tracing::info!("Listening on: {}", listen);

    tokio::select! {
        result = publisher.serve(&listen) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            publisher.stop().await;
        }
    }

    Ok(())
}
