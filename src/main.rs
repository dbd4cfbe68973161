//! PMTiles Edge server
//!
//! Loads configuration, sets up logging and serves tiles until Ctrl-C.

use anyhow::Context;
use pmtiles_edge::{ServerConfig, TileServer};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// # Usage
/// ```bash
/// # Start with default config (pmtiles_edge.yaml)
/// pmtiles-edge
///
/// # Start with custom config
/// pmtiles-edge /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting PMTiles Edge server");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "pmtiles_edge.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = ServerConfig::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    info!("Configuration loaded successfully");
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Bucket backend: {:?}", config.bucket.backend);
    info!("  - Archive prefix: {:?}", config.archive_prefix);
    info!("  - Resolved cache capacity: {}", config.resolved_cache_capacity);
    info!(
        "  - Edge cache: enabled={}, version={}, disk={:?}",
        config.edge_cache.enabled, config.edge_cache.version, config.edge_cache.disk_dir
    );
    info!("  - Metrics: {}", config.enable_metrics);

    let server = Arc::new(
        TileServer::from_config(&config)
            .await
            .context("building tile server")?,
    );

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
