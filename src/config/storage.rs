//! Storage configuration types.

use serde::Deserialize;

/// Topology store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file. `:memory:` keeps everything in process.
    pub sqlite_path: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Seconds a writer waits on a locked database before failing.
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "./data/topology.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 30,
        }
    }
}
