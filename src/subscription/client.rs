//! Client side of the Watch RPC.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tonic::Status;
use tracing::debug;

use crate::grpc::{connect_channel, RpcError};
use crate::proto::watch_client::WatchClient;
use crate::proto::{WatchRequest, WatchResponse};

/// Responses from one pod's watch stream.
pub type WatchStream = BoxStream<'static, Result<WatchResponse, Status>>;

/// Opens watch streams on worker pods.
#[async_trait]
pub trait WatchConnector: Send + Sync + 'static {
    /// Start a watch on the worker at `address` (`host:port`).
    async fn open(&self, address: &str, request: WatchRequest) -> Result<WatchStream, RpcError>;
}

/// Connector that dials a fresh tonic channel per stream.
#[derive(Debug, Default, Clone)]
pub struct GrpcWatchConnector;

impl GrpcWatchConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WatchConnector for GrpcWatchConnector {
    async fn open(&self, address: &str, request: WatchRequest) -> Result<WatchStream, RpcError> {
        let channel = connect_channel(address).await?;
        let stream = WatchClient::new(channel)
            .watch(request)
            .await?
            .into_inner();
        debug!(address, "watch stream opened");
        Ok(stream.boxed())
    }
}
