use anyhow::Result;
use clap::Parser;
use meshcache_server::metrics::init_metrics;
use meshcache_server::{AppState, CacheNode, ServerConfig, create_router, spawn_cluster_listener};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "meshcache-server", version, about = "Distributed cache node")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "MESHCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Node identifier (overrides config)
    #[arg(long)]
    node_id: Option<String>,

    /// Cluster listener address (overrides config)
    #[arg(long)]
    node_address: Option<String>,

    /// HTTP host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(node_id) = args.node_id {
        config.cluster.node_id = Some(node_id);
    }
    if let Some(address) = args.node_address {
        config.cluster.node_address = address;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging.level, &config.logging.format);
    info!("Starting meshcache server v{}", env!("CARGO_PKG_VERSION"));
    init_metrics();

    let node = CacheNode::builder(config.cluster.clone())
        .http_address(config.server_addr())
        .build()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                shutdown_tx.send_replace(true);
            }
            Err(e) => {
                warn!("Failed to listen for Ctrl-C: {}", e);
                // dropping the sender would stop the server
                std::future::pending::<()>().await;
            }
        }
    });

    let (cluster_addr, listener_task) =
        spawn_cluster_listener(&config.cluster.node_address, node.clone(), shutdown_rx.clone())
            .await?;
    info!("Node {} serving peers on {}", node.node_id(), cluster_addr);

    node.start();

    let app = create_router(AppState { node: node.clone() });
    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on http://{}", addr);

    let mut http_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = http_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    node.shutdown().await;
    let _ = listener_task.await;
    info!("meshcache server stopped");
    Ok(())
}
