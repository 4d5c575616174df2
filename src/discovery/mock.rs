//! Mock discovery connector for testing.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::client::DiscoveryConnector;
use crate::grpc::RpcError;
use crate::proto::Service;

/// Answers `DescribeTopology` from a fixed table keyed by `host:port`.
///
/// Addresses with no entry fail with `UNAVAILABLE`, as an unreachable pod would.
#[derive(Default)]
pub struct MockDiscoveryConnector {
    topologies: RwLock<HashMap<String, Service>>,
    failing: RwLock<HashSet<String>>,
    hanging: RwLock<HashSet<String>>,
    calls: RwLock<Vec<String>>,
}

impl MockDiscoveryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_topology(&self, address: &str, service: Service) {
        self.topologies
            .write()
            .await
            .insert(address.to_string(), service);
    }

    /// Make calls to `address` fail even if a topology is registered.
    pub async fn set_failing(&self, address: &str) {
        self.failing.write().await.insert(address.to_string());
    }

    /// Make calls to `address` never complete, as a pod that accepts the
    /// connection but never answers would.
    pub async fn set_hanging(&self, address: &str) {
        self.hanging.write().await.insert(address.to_string());
    }

    /// Addresses dialed so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl DiscoveryConnector for MockDiscoveryConnector {
    async fn describe_topology(&self, address: &str) -> Result<Option<Service>, RpcError> {
        self.calls.write().await.push(address.to_string());
        if self.hanging.read().await.contains(address) {
            std::future::pending::<()>().await;
        }
        if self.failing.read().await.contains(address) {
            return Err(RpcError::Status(tonic::Status::internal("mock failure")));
        }
        match self.topologies.read().await.get(address) {
            Some(service) => Ok(Some(service.clone())),
            None => Err(RpcError::Status(tonic::Status::unavailable(format!(
                "nothing listening on {address}"
            )))),
        }
    }
}
