//! Mock watch connector for testing.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tonic::Status;

use super::client::{WatchConnector, WatchStream};
use crate::grpc::RpcError;
use crate::proto::{WatchRequest, WatchResponse};

/// Scripted watch streams keyed by `host:port`.
#[derive(Default)]
pub struct MockWatchConnector {
    scripts: RwLock<HashMap<String, Vec<Result<WatchResponse, Status>>>>,
    /// Addresses whose stream stays open after the script runs out.
    hanging: RwLock<HashSet<String>>,
    requests: RwLock<Vec<(String, WatchRequest)>>,
}

impl MockWatchConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream `items` from `address`, then end.
    pub async fn script(&self, address: &str, items: Vec<Result<WatchResponse, Status>>) {
        self.scripts.write().await.insert(address.to_string(), items);
    }

    /// Stream `items` from `address`, then stay open until dropped.
    pub async fn script_hanging(&self, address: &str, items: Vec<Result<WatchResponse, Status>>) {
        self.script(address, items).await;
        self.hanging.write().await.insert(address.to_string());
    }

    /// Requests received so far, with the address they were sent to.
    pub async fn requests(&self) -> Vec<(String, WatchRequest)> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl WatchConnector for MockWatchConnector {
    async fn open(&self, address: &str, request: WatchRequest) -> Result<WatchStream, RpcError> {
        self.requests
            .write()
            .await
            .push((address.to_string(), request));

        let Some(items) = self.scripts.read().await.get(address).cloned() else {
            return Err(RpcError::Status(Status::unavailable(format!(
                "nothing listening on {address}"
            ))));
        };
        let scripted = stream::iter(items);
        if self.hanging.read().await.contains(address) {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }
}
