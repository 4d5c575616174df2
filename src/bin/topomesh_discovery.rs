//! topomesh-discovery: topology reconciliation service
//!
//! Periodically lists annotated worker pods, scrapes the topology each one
//! declares over the Discovery RPC and keeps the topology store in step with
//! what is actually running.
//!
//! ## Architecture
//! ```text
//! [K8s API] -> [Scraper] -> [Reconciler] -> [SQLite topology store]
//!                  |
//!                  v
//!         [worker Discovery RPC]
//! ```
//!
//! ## Configuration
//! - `--config` / TOPOMESH_CONFIG: YAML configuration file
//! - TOPOMESH__DISCOVERY__INTERVAL_SECS etc: per-key overrides
//! - TOPOMESH_LOG: log filter (default: info)

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use topomesh::config::Config;
use topomesh::discovery::{GrpcDiscoveryConnector, K8sPodDirectory, Scraper};
use topomesh::services::Reconciler;
use topomesh::storage::init_topology_store;
use topomesh::utils::bootstrap::{init_tracing, shutdown_token};

#[derive(Debug, Parser)]
#[command(name = "topomesh-discovery", about = "Reconcile worker topologies into the store")]
struct Args {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let store = init_topology_store(&config.storage).await?;
    let directory = Arc::new(K8sPodDirectory::new(config.discovery.pod_namespace()).await?);
    let connector = Arc::new(GrpcDiscoveryConnector::new());
    let scraper = Scraper::new(directory, connector, &config.discovery);
    let reconciler = Reconciler::new(store, scraper, &config.discovery);

    info!("topomesh-discovery running, press Ctrl+C to exit");
    let cancel = shutdown_token();
    reconciler.run(cancel).await.map_err(|e| {
        error!(error = %e, "Reconciler failed");
        e
    })?;

    Ok(())
}
