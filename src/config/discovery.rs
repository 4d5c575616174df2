//! Pod discovery and reconciliation configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default annotation that opts a pod into topology scraping.
pub const DEFAULT_SCRAPE_ANNOTATION: &str = "topomesh.io/scrape";
/// Default annotation overriding the pod's RPC port.
pub const DEFAULT_PORT_ANNOTATION: &str = "topomesh.io/port";
/// Default worker RPC port when a pod carries no port annotation.
pub const DEFAULT_RPC_PORT: u16 = 9090;

/// Discovery configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Seconds to wait after a reconciliation pass before starting the next.
    pub interval_secs: u64,
    /// Overall deadline for the scraping part of one pass.
    pub scrape_deadline_secs: u64,
    /// RPC port used for pods without a port annotation.
    pub default_port: u16,
    /// Annotation that must be `"true"` for a pod to be scraped.
    pub scrape_annotation: String,
    /// Annotation carrying the pod's RPC port.
    pub port_annotation: String,
    /// Namespace to list pods in. `None` lists across all namespaces.
    pub namespace: Option<String>,
    /// Maximum number of pods scraped concurrently within one pass.
    pub scrape_concurrency: usize,
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn scrape_deadline(&self) -> Duration {
        Duration::from_secs(self.scrape_deadline_secs)
    }

    /// Namespace to scope pod listing to; blank means every namespace.
    pub fn pod_namespace(&self) -> Option<String> {
        self.namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            scrape_deadline_secs: 120,
            default_port: DEFAULT_RPC_PORT,
            scrape_annotation: DEFAULT_SCRAPE_ANNOTATION.to_string(),
            port_annotation: DEFAULT_PORT_ANNOTATION.to_string(),
            namespace: None,
            scrape_concurrency: 8,
        }
    }
}
