//! Watch RPC: streams a processor instance's live operations.

mod registry;

pub use registry::{ObservabilityWatcher, SendFn, WatchError, WatchKey};

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::proto::watch_server::Watch;
use crate::proto::{WatchRequest, WatchResponse};
use crate::validation::validate_watch_request;

type WatchSender = mpsc::Sender<Result<WatchResponse, Status>>;

/// Watch service backed by an [`ObservabilityWatcher`].
///
/// Each stream gets a bounded channel. A publish that finds the channel full
/// or closed ends that stream; other streams are unaffected.
pub struct WatchService {
    watcher: Arc<ObservabilityWatcher>,
    buffer: usize,
}

impl WatchService {
    pub fn new(watcher: Arc<ObservabilityWatcher>, buffer: usize) -> Self {
        Self {
            watcher,
            buffer: buffer.max(1),
        }
    }
}

fn sender_callback(tx: WatchSender) -> SendFn {
    Box::new(move |operation| {
        tx.try_send(Ok(WatchResponse {
            operation: Some(operation.clone()),
        }))
        .map_err(|e| match e {
            TrySendError::Full(_) => WatchError::Full,
            TrySendError::Closed(_) => WatchError::Closed,
        })
    })
}

#[tonic::async_trait]
impl Watch for WatchService {
    type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchResponse, Status>> + Send + 'static>>;

    async fn watch(
        &self,
        request: Request<WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let req = request.into_inner();
        validate_watch_request(&req)?;
        let key = WatchKey::from(req);

        let (tx, rx) = mpsc::channel(self.buffer);
        let cancel = CancellationToken::new();

        // Cancel the watch when the client goes away.
        let disconnect = cancel.clone();
        let closed_tx = tx.clone();
        let disconnect_key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed_tx.closed() => {
                    info!(key = %disconnect_key, "Watcher disconnected");
                    disconnect.cancel();
                }
                _ = disconnect.cancelled() => {}
            }
        });

        let watcher = Arc::clone(&self.watcher);
        let send = sender_callback(tx);
        debug!(%key, "Watch stream opened");
        tokio::spawn(async move {
            watcher.watch(&cancel, key, send).await;
            // Releases the disconnect task's sender so the stream ends.
            cancel.cancel();
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
