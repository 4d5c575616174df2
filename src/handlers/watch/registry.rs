//! In-process registry of live watchers.
//!
//! A running processor instance publishes every operation it performs; each
//! watcher registered for the same (component, processor, key) receives it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::proto::{Operation, WatchRequest};

/// Why a watcher's send callback refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("watcher buffer is full")]
    Full,

    #[error("watcher has disconnected")]
    Closed,
}

/// Delivers one operation to a watcher. Must not block.
pub type SendFn = Box<dyn Fn(&Operation) -> Result<(), WatchError> + Send + Sync>;

/// What a watcher is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub component: String,
    pub processor: String,
    /// Partition key of the processor instance.
    pub key: String,
}

impl WatchKey {
    pub fn new(
        component: impl Into<String>,
        processor: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            processor: processor.into(),
            key: key.into(),
        }
    }
}

impl From<WatchRequest> for WatchKey {
    fn from(req: WatchRequest) -> Self {
        Self {
            component: req.component,
            processor: req.processor,
            key: req.key,
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.component, self.processor, self.key)
    }
}

struct Handle {
    send: SendFn,
    cancel: CancellationToken,
}

type Buckets = HashMap<WatchKey, HashMap<Uuid, Handle>>;

fn remove_handle(buckets: &mut Buckets, key: &WatchKey, id: &Uuid) {
    if let Some(bucket) = buckets.get_mut(key) {
        bucket.remove(id);
        if bucket.is_empty() {
            buckets.remove(key);
        }
    }
}

/// Deregisters one watcher when released or dropped.
///
/// Dropping happens when the future running [`ObservabilityWatcher::watch`]
/// is dropped before the watch ends, for example when a caller wraps it in a
/// timeout or `select!`.
struct Registration {
    buckets: Arc<RwLock<Buckets>>,
    key: WatchKey,
    id: Uuid,
    cancel: CancellationToken,
    armed: bool,
}

impl Registration {
    async fn release(mut self) {
        self.armed = false;
        remove_handle(&mut *self.buckets.write().await, &self.key, &self.id);
        debug!(key = %self.key, id = %self.id, "watcher deregistered");
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Publishers skip the handle from here on, even before it is removed.
        self.cancel.cancel();

        if let Ok(mut buckets) = self.buckets.try_write() {
            remove_handle(&mut buckets, &self.key, &self.id);
            debug!(key = %self.key, id = %self.id, "watcher deregistered on drop");
            return;
        }

        let buckets = Arc::clone(&self.buckets);
        let key = self.key.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    remove_handle(&mut *buckets.write().await, &key, &id);
                    debug!(%key, %id, "watcher deregistered on drop");
                });
            }
            Err(_) => warn!(%key, %id, "no runtime to deregister dropped watcher"),
        }
    }
}

/// Publish/subscribe registry keyed by [`WatchKey`].
///
/// Shared by `Arc` between the processor runtime (publishing) and the Watch
/// RPC (subscribing).
#[derive(Default)]
pub struct ObservabilityWatcher {
    buckets: Arc<RwLock<Buckets>>,
}

impl ObservabilityWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `send` under `key` and block until the watch ends.
    ///
    /// The watch ends when `cancel` fires or when `send` fails during a
    /// publish. The handle is deregistered before returning, and also when
    /// the returned future is dropped early.
    pub async fn watch(&self, cancel: &CancellationToken, key: WatchKey, send: SendFn) {
        let id = Uuid::new_v4();
        let handle_cancel = cancel.child_token();

        {
            let mut buckets = self.buckets.write().await;
            let bucket = buckets.entry(key.clone()).or_default();
            if bucket.contains_key(&id) {
                panic!("watch id collision: {id} already registered for {key}");
            }
            bucket.insert(
                id,
                Handle {
                    send,
                    cancel: handle_cancel.clone(),
                },
            );
            debug!(%key, %id, watchers = bucket.len(), "watcher registered");
        }
        let registration = Registration {
            buckets: Arc::clone(&self.buckets),
            key,
            id,
            cancel: handle_cancel.clone(),
            armed: true,
        };

        handle_cancel.cancelled().await;

        registration.release().await;
    }

    /// Deliver `operation` to every watcher of `key`.
    ///
    /// A watcher whose callback fails is cancelled; the others still receive
    /// the operation. Returns the number of successful deliveries.
    pub async fn publish(&self, key: &WatchKey, operation: &Operation) -> usize {
        let buckets = self.buckets.read().await;
        let Some(bucket) = buckets.get(key) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, handle) in bucket {
            if handle.cancel.is_cancelled() {
                continue;
            }
            match (handle.send)(operation) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(%key, %id, error = %e, "send failed, cancelling watcher");
                    handle.cancel.cancel();
                }
            }
        }
        trace!(%key, delivered, "operation published");
        delivered
    }

    /// Number of watchers registered for `key`, and whether the key has a bucket.
    pub async fn count(&self, key: &WatchKey) -> (usize, bool) {
        match self.buckets.read().await.get(key) {
            Some(bucket) => (bucket.len(), true),
            None => (0, false),
        }
    }
}
