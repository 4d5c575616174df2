//! Discovery RPC: a worker describes the topology it serves.

use tonic::{Request, Response, Status};
use tracing::debug;

use crate::proto::discovery_server::Discovery;
use crate::proto::{DescribeTopologyRequest, DescribeTopologyResponse, Service};

/// Serves a fixed topology. A worker's topology never changes while it runs.
pub struct TopologyService {
    service: Service,
}

impl TopologyService {
    pub fn new(service: Service) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl Discovery for TopologyService {
    async fn describe_topology(
        &self,
        _request: Request<DescribeTopologyRequest>,
    ) -> Result<Response<DescribeTopologyResponse>, Status> {
        debug!(service = %self.service.name, "DescribeTopology");
        Ok(Response::new(DescribeTopologyResponse {
            service: Some(self.service.clone()),
        }))
    }
}
