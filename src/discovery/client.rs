//! Client side of the Discovery RPC.

use async_trait::async_trait;
use tracing::debug;

use crate::grpc::{connect_channel, RpcError};
use crate::proto::discovery_client::DiscoveryClient;
use crate::proto::{DescribeTopologyRequest, Service};

/// Opens a connection to a worker and asks for its topology.
#[async_trait]
pub trait DiscoveryConnector: Send + Sync + 'static {
    /// Call `DescribeTopology` on the worker at `address` (`host:port`).
    ///
    /// Returns `None` if the worker answered without a service.
    async fn describe_topology(&self, address: &str) -> Result<Option<Service>, RpcError>;
}

/// Connector that dials a fresh tonic channel per call.
#[derive(Debug, Default, Clone)]
pub struct GrpcDiscoveryConnector;

impl GrpcDiscoveryConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DiscoveryConnector for GrpcDiscoveryConnector {
    async fn describe_topology(&self, address: &str) -> Result<Option<Service>, RpcError> {
        let channel = connect_channel(address).await?;
        let mut client = DiscoveryClient::new(channel);
        let response = client
            .describe_topology(DescribeTopologyRequest {})
            .await?
            .into_inner();
        debug!(address, "topology described");
        Ok(response.service)
    }
}
