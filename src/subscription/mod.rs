//! Subscription aggregator.
//!
//! A processor instance may be served by several pods at once. A subscription
//! resolves every pod serving the processor, opens one watch stream per pod
//! and merges them into a single channel. Ordering holds per pod only.

pub mod client;
pub mod event;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{GrpcWatchConnector, WatchConnector, WatchStream};
pub use event::{Action, Input, KeyedRecord, Operation, Record};

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::Code;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::discovery::{DirectoryError, PodDirectory};
use crate::grpc::RpcError;
use crate::proto::WatchRequest;
use crate::storage::{ProcessorId, TopologyError, TopologyStore};

/// Errors resolving or running a subscription.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("unknown processor: {0}")]
    UnknownProcessor(String),

    #[error("no live pod serves processor {0}")]
    NoServingPods(String),

    #[error("topology store error: {0}")]
    Store(#[from] TopologyError),

    #[error("pod directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("watch on pod {pod} ({address}) failed: {source}")]
    Transport {
        pod: String,
        address: String,
        #[source]
        source: RpcError,
    },

    #[error("watch task failed: {0}")]
    Task(String),
}

/// A live, merged watch across every pod serving one processor instance.
pub struct Subscription {
    receiver: mpsc::Receiver<Operation>,
    outcome: JoinHandle<Result<(), SubscribeError>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl Subscription {
    /// Next operation from any pod; `None` once every pod stream has ended.
    pub async fn next(&mut self) -> Option<Operation> {
        self.receiver.recv().await
    }

    /// Stop every pod stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the subscription if still running and report how it ended.
    ///
    /// Returns the first transport error seen on any pod stream.
    pub async fn finish(self) -> Result<(), SubscribeError> {
        self.cancel.cancel();
        drop(self.receiver);
        match self.outcome.await {
            Ok(result) => result,
            Err(e) => Err(SubscribeError::Task(e.to_string())),
        }
    }
}

/// Resolves processors to pods and fans their watch streams in.
pub struct SubscriptionAggregator {
    store: Arc<dyn TopologyStore>,
    directory: Arc<dyn PodDirectory>,
    connector: Arc<dyn WatchConnector>,
    port_annotation: String,
    default_port: u16,
}

impl SubscriptionAggregator {
    pub fn new(
        store: Arc<dyn TopologyStore>,
        directory: Arc<dyn PodDirectory>,
        connector: Arc<dyn WatchConnector>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            directory,
            connector,
            port_annotation: config.port_annotation.clone(),
            default_port: config.default_port,
        }
    }

    /// Watch a processor addressed by its natural key.
    pub async fn subscribe_by_name(
        &self,
        service: &str,
        component: &str,
        processor: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Subscription, SubscribeError> {
        let id = self
            .store
            .find_processor(service, component, processor)
            .await?
            .ok_or_else(|| {
                SubscribeError::UnknownProcessor(format!("{service}/{component}/{processor}"))
            })?;
        self.subscribe(id, key, cancel).await
    }

    /// Watch instance `key` of processor `id` on every pod serving it.
    ///
    /// Fails up front if the processor is unknown or no serving pod can be
    /// reached. Cancelling `cancel` (or the returned subscription) stops
    /// every pod stream.
    pub async fn subscribe(
        &self,
        id: ProcessorId,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Subscription, SubscribeError> {
        let placement = self
            .store
            .resolve_processor(id)
            .await?
            .ok_or_else(|| SubscribeError::UnknownProcessor(id.to_string()))?;

        let live: HashMap<String, _> = self
            .directory
            .list_pods()
            .await?
            .into_iter()
            .map(|p| (p.qualified_name(), p))
            .collect();

        let mut targets = Vec::with_capacity(placement.pods.len());
        for pod in &placement.pods {
            let Some(info) = live.get(pod) else {
                warn!(pod = %pod, processor = %id, "Pod not in directory, skipping");
                continue;
            };
            let Some(address) = info.rpc_address(&self.port_annotation, self.default_port) else {
                warn!(pod = %pod, processor = %id, "Pod has no IP, skipping");
                continue;
            };
            targets.push((pod.clone(), address));
        }

        if targets.is_empty() {
            return Err(SubscribeError::NoServingPods(format!(
                "{}/{}",
                placement.component, placement.processor
            )));
        }

        let request = WatchRequest {
            component: placement.component.clone(),
            processor: placement.processor.clone(),
            key: key.to_string(),
        };
        info!(
            component = %request.component,
            processor = %request.processor,
            key = %request.key,
            pods = targets.len(),
            "Opening subscription"
        );

        let cancel = cancel.child_token();
        let (tx, receiver) = mpsc::channel(1);
        let mut tasks = JoinSet::new();
        for (pod, address) in targets {
            tasks.spawn(forward(
                Arc::clone(&self.connector),
                pod,
                address,
                request.clone(),
                tx.clone(),
                cancel.clone(),
            ));
        }
        // The channel closes once every task has dropped its sender.
        drop(tx);

        let outcome_cancel = cancel.clone();
        let outcome = tokio::spawn(async move {
            let mut first_error = None;
            while let Some(joined) = tasks.join_next().await {
                let result = joined.unwrap_or_else(|e| Err(SubscribeError::Task(e.to_string())));
                if let Err(e) = result {
                    outcome_cancel.cancel();
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        });

        Ok(Subscription {
            receiver,
            outcome,
            _guard: cancel.clone().drop_guard(),
            cancel,
        })
    }
}

/// Pump one pod's watch stream into the shared channel.
async fn forward(
    connector: Arc<dyn WatchConnector>,
    pod: String,
    address: String,
    request: WatchRequest,
    tx: mpsc::Sender<Operation>,
    cancel: CancellationToken,
) -> Result<(), SubscribeError> {
    let transport = |pod: &str, address: &str, source: RpcError| SubscribeError::Transport {
        pod: pod.to_string(),
        address: address.to_string(),
        source,
    };

    let opened = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        opened = connector.open(&address, request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!(pod = %pod, %address, error = %e, "Failed to open watch stream");
            cancel.cancel();
            return Err(transport(&pod, &address, e));
        }
    };

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(pod = %pod, "Watch stream cancelled");
                return Ok(());
            }
            item = stream.next() => item,
        };

        match item {
            None => {
                debug!(pod = %pod, "Watch stream ended");
                return Ok(());
            }
            Some(Ok(response)) => {
                let Some(operation) = response.operation else {
                    debug!(pod = %pod, "Dropping empty watch response");
                    continue;
                };
                let sent = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    sent = tx.send(Operation::from(operation)) => sent,
                };
                if sent.is_err() {
                    // Subscriber went away.
                    return Ok(());
                }
            }
            Some(Err(status)) if status.code() == Code::Cancelled => {
                debug!(pod = %pod, "Watch stream cancelled by server");
                return Ok(());
            }
            Some(Err(status)) => {
                warn!(pod = %pod, %address, error = %status, "Watch stream failed");
                cancel.cancel();
                return Err(transport(&pod, &address, RpcError::Status(status)));
            }
        }
    }
}
