//! Worker-side server configuration.

use serde::Deserialize;

use super::discovery::DEFAULT_RPC_PORT;

/// Configuration for the RPC server a worker pod exposes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port serving the Discovery and Watch RPCs.
    pub port: u16,
    /// Per-stream buffer between the watcher and a gRPC watch response.
    pub stream_buffer: usize,
}

impl WorkerConfig {
    /// Socket address string in `host:port` form.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_RPC_PORT,
            stream_buffer: 32,
        }
    }
}
