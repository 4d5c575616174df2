//! Topology storage.
//!
//! Keeps a normalized copy of every service topology reported by worker pods,
//! plus membership edges recording which pod serves which element. Every
//! write is scoped to one pod and runs inside a single transaction.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::StorageConfig;
use crate::proto::Service;
use crate::validation::ValidationError;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTopologyStore;

/// Result type for topology store operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Errors from topology store operations.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("invalid topology reported by pod {pod}: {source}")]
    InvalidTopology {
        pod: String,
        #[source]
        source: ValidationError,
    },

    #[error("pod {pod} is a member of {count} services")]
    Inconsistent { pod: String, count: usize },

    #[error("pod {pod} already serves service {existing}, not {reported}")]
    ServiceMismatch {
        pod: String,
        existing: String,
        reported: String,
    },
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for TopologyError {
    fn from(err: sqlx::Error) -> Self {
        TopologyError::Database(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::migrate::MigrateError> for TopologyError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        TopologyError::Migration(err.to_string())
    }
}

/// Store-assigned identity of a processor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(pub i64);

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a processor currently runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorPlacement {
    pub id: ProcessorId,
    /// Name of the owning component.
    pub component: String,
    /// Processor name within the component.
    pub processor: String,
    /// Pods holding a membership edge to this processor, sorted by name.
    pub pods: Vec<String>,
}

/// Backing store for the normalized topology.
///
/// `upsert`, `delete` and the reads are each atomic. Entities are singletons by
/// natural key; the most recent report wins for mutable fields.
#[async_trait]
pub trait TopologyStore: Send + Sync + 'static {
    /// Record `service` as the topology served by `pod`.
    ///
    /// Creates or updates every entity by natural key, adds the pod's membership
    /// edges, and reconciles each processor's topic edges and persistence
    /// topic to exactly match the report.
    async fn upsert(&self, pod: &str, service: &Service) -> Result<()>;

    /// Names of all pods with at least one membership edge.
    async fn list_known_pod_names(&self) -> Result<BTreeSet<String>>;

    /// Forget `pod` and reclaim every entity no other pod still references.
    ///
    /// Unknown pods are a no-op.
    async fn delete(&self, pod: &str) -> Result<()>;

    /// Rebuild the aggregate served by `pod` from its membership edges only.
    ///
    /// Returns `None` when the pod has no membership edges.
    async fn get_topology_for_pod(&self, pod: &str) -> Result<Option<Service>>;

    /// Look up a processor by its natural key.
    async fn find_processor(
        &self,
        service: &str,
        component: &str,
        processor: &str,
    ) -> Result<Option<ProcessorId>>;

    /// Resolve a processor to its owning component and serving pods.
    async fn resolve_processor(&self, id: ProcessorId) -> Result<Option<ProcessorPlacement>>;
}

/// Open the configured topology store and bring its schema up to date.
#[cfg(feature = "sqlite")]
pub async fn init_topology_store(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn TopologyStore>, Box<dyn std::error::Error>> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::time::Duration;

    info!(path = %config.sqlite_path, "opening topology store");

    if config.sqlite_path != ":memory:" {
        if let Some(parent) = std::path::Path::new(&config.sqlite_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let opts = SqliteConnectOptions::new()
        .filename(&config.sqlite_path)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
        .foreign_keys(true)
        .create_if_missing(true);

    // An in-memory database lives and dies with a single connection.
    let max_connections = if config.sqlite_path == ":memory:" {
        1
    } else {
        config.max_connections.max(1)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;

    let store = SqliteTopologyStore::new(pool);
    store.migrate().await?;

    Ok(Arc::new(store))
}
