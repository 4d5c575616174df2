//! Worker-side RPC server.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use super::discovery::TopologyService;
use super::watch::{ObservabilityWatcher, WatchService};
use crate::config::WorkerConfig;
use crate::proto::discovery_server::DiscoveryServer;
use crate::proto::watch_server::WatchServer;
use crate::proto::Service;

/// Bind the worker RPC listener on the configured host and port.
pub async fn bind_worker(config: &WorkerConfig) -> std::io::Result<TcpListener> {
    TcpListener::bind(config.bind_address()).await
}

/// Serve the Discovery, Watch and gRPC health services on `listener` until
/// `cancel` fires.
pub async fn serve_worker(
    listener: TcpListener,
    config: &WorkerConfig,
    topology: Service,
    watcher: Arc<ObservabilityWatcher>,
    cancel: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<DiscoveryServer<TopologyService>>()
        .await;
    health_reporter
        .set_serving::<WatchServer<WatchService>>()
        .await;

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, service = %topology.name, "Worker RPC server listening");
    }

    Server::builder()
        .add_service(health_service)
        .add_service(DiscoveryServer::new(TopologyService::new(topology)))
        .add_service(WatchServer::new(WatchService::new(
            watcher,
            config.stream_buffer,
        )))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), cancel.cancelled_owned())
        .await
}
