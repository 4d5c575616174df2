//! topomesh-watch: follow one processor instance across every pod
//!
//! Resolves the processor through the topology store, finds the pods that
//! serve it in the cluster and prints each operation they report as one JSON
//! object per line.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use topomesh::config::Config;
use topomesh::discovery::K8sPodDirectory;
use topomesh::storage::{init_topology_store, ProcessorId};
use topomesh::subscription::{GrpcWatchConnector, SubscriptionAggregator};
use topomesh::utils::bootstrap::{init_tracing_with_default, shutdown_token};

#[derive(Debug, Parser)]
#[command(name = "topomesh-watch", about = "Stream live operations of a processor instance")]
struct Args {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Store id of the processor to watch.
    #[arg(long, conflicts_with_all = ["service", "component", "processor"])]
    processor_id: Option<i64>,

    /// Service owning the processor.
    #[arg(long, requires_all = ["component", "processor"])]
    service: Option<String>,

    /// Component owning the processor.
    #[arg(long, requires = "service")]
    component: Option<String>,

    /// Processor name within the component.
    #[arg(long, requires = "service")]
    processor: Option<String>,

    /// Partition key of the processor instance.
    #[arg(long)]
    key: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing_with_default("warn");
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let store = init_topology_store(&config.storage).await?;
    let directory = Arc::new(K8sPodDirectory::new(config.discovery.pod_namespace()).await?);
    let aggregator = SubscriptionAggregator::new(
        store,
        directory,
        Arc::new(GrpcWatchConnector::new()),
        &config.discovery,
    );

    let cancel = shutdown_token();
    let mut subscription = match (args.processor_id, args.service, args.component, args.processor)
    {
        (Some(id), _, _, _) => {
            aggregator
                .subscribe(ProcessorId(id), &args.key, &cancel)
                .await?
        }
        (None, Some(service), Some(component), Some(processor)) => {
            aggregator
                .subscribe_by_name(&service, &component, &processor, &args.key, &cancel)
                .await?
        }
        _ => {
            return Err(
                "either --processor-id or --service/--component/--processor is required".into(),
            )
        }
    };
    info!(key = %args.key, "Watching");

    let stdout = std::io::stdout();
    while let Some(operation) = subscription.next().await {
        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, &operation)?;
        writeln!(out)?;
        out.flush()?;
    }

    subscription.finish().await.map_err(|e| {
        error!(error = %e, "Watch failed");
        e
    })?;

    Ok(())
}
