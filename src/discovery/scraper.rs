//! Scraper: finds scrapeable pods and asks each for its topology.

use std::sync::Arc;

use tracing::debug;

use super::client::DiscoveryConnector;
use super::pods::{DirectoryError, PodDirectory, PodInfo};
use crate::config::DiscoveryConfig;
use crate::grpc::RpcError;
use crate::proto::Service;
use crate::validation::{validate_topology, ValidationError};

/// Annotation value that opts a pod into scraping.
const SCRAPE_ENABLED: &str = "true";

/// Failure scraping one pod. Never fatal to a pass.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("pod {pod} has no IP address")]
    NoAddress { pod: String },

    #[error("pod {pod}: {source}")]
    Rpc {
        pod: String,
        #[source]
        source: RpcError,
    },

    #[error("pod {pod} answered without a topology")]
    Empty { pod: String },

    #[error("pod {pod} reported an invalid topology: {source}")]
    Invalid {
        pod: String,
        #[source]
        source: ValidationError,
    },
}

impl ScrapeError {
    /// Name of the pod that failed.
    pub fn pod(&self) -> &str {
        match self {
            ScrapeError::NoAddress { pod }
            | ScrapeError::Rpc { pod, .. }
            | ScrapeError::Empty { pod }
            | ScrapeError::Invalid { pod, .. } => pod,
        }
    }
}

/// Finds scrapeable pods and fetches their declared topology.
pub struct Scraper {
    directory: Arc<dyn PodDirectory>,
    connector: Arc<dyn DiscoveryConnector>,
    scrape_annotation: String,
    port_annotation: String,
    default_port: u16,
}

impl Scraper {
    pub fn new(
        directory: Arc<dyn PodDirectory>,
        connector: Arc<dyn DiscoveryConnector>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            directory,
            connector,
            scrape_annotation: config.scrape_annotation.clone(),
            port_annotation: config.port_annotation.clone(),
            default_port: config.default_port,
        }
    }

    /// Running pods annotated for scraping.
    pub async fn list_candidates(&self) -> Result<Vec<PodInfo>, DirectoryError> {
        let pods = self.directory.list_pods().await?;
        let total = pods.len();
        let candidates: Vec<PodInfo> = pods
            .into_iter()
            .filter(|p| p.is_running())
            .filter(|p| p.annotation(&self.scrape_annotation) == Some(SCRAPE_ENABLED))
            .collect();
        debug!(total, candidates = candidates.len(), "listed scrape candidates");
        Ok(candidates)
    }

    /// Ask `pod` for its topology. One attempt, no retries.
    pub async fn fetch_topology(&self, pod: &PodInfo) -> Result<Service, ScrapeError> {
        let name = pod.qualified_name();
        let address = pod
            .rpc_address(&self.port_annotation, self.default_port)
            .ok_or_else(|| ScrapeError::NoAddress {
                pod: name.clone(),
            })?;

        let service = self
            .connector
            .describe_topology(&address)
            .await
            .map_err(|source| ScrapeError::Rpc {
                pod: name.clone(),
                source,
            })?
            .ok_or_else(|| ScrapeError::Empty {
                pod: name.clone(),
            })?;

        validate_topology(&service).map_err(|source| ScrapeError::Invalid {
            pod: name.clone(),
            source,
        })?;

        debug!(pod = %name, %address, service = %service.name, "scraped topology");
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::mock::MockDiscoveryConnector;
    use crate::discovery::pods::{StaticPodDirectory, PHASE_RUNNING};
    use crate::proto::{Component, Processor};

    fn pod(name: &str, ip: &str, phase: &str, annotations: &[(&str, &str)]) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            namespace: "default".to_string(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            phase: phase.to_string(),
            ip: Some(ip.to_string()),
        }
    }

    fn service() -> Service {
        Service {
            name: "orders".to_string(),
            components: vec![Component {
                name: "billing".to_string(),
                processors: vec![Processor {
                    name: "enrich".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn scraper(pods: Vec<PodInfo>, connector: Arc<MockDiscoveryConnector>) -> Scraper {
        Scraper::new(
            Arc::new(StaticPodDirectory::new(pods)),
            connector,
            &DiscoveryConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_list_candidates_filters_annotation_and_phase() {
        let scrape = ("topomesh.io/scrape", "true");
        let pods = vec![
            pod("ok", "10.0.0.1", PHASE_RUNNING, &[scrape]),
            pod("pending", "10.0.0.2", "Pending", &[scrape]),
            pod("unannotated", "10.0.0.3", PHASE_RUNNING, &[]),
            pod("disabled", "10.0.0.4", PHASE_RUNNING, &[("topomesh.io/scrape", "false")]),
        ];
        let s = scraper(pods, Arc::new(MockDiscoveryConnector::new()));

        let names: Vec<_> = s
            .list_candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_fetch_topology_uses_port_annotation() {
        let connector = Arc::new(MockDiscoveryConnector::new());
        connector.set_topology("10.0.0.1:7000", service()).await;
        let s = scraper(vec![], connector.clone());

        let p = pod("w", "10.0.0.1", PHASE_RUNNING, &[("topomesh.io/port", "7000")]);
        let svc = s.fetch_topology(&p).await.unwrap();

        assert_eq!(svc, service());
        assert_eq!(connector.calls().await, vec!["10.0.0.1:7000"]);
    }

    #[tokio::test]
    async fn test_fetch_topology_defaults_port() {
        let connector = Arc::new(MockDiscoveryConnector::new());
        connector.set_topology("10.0.0.1:9090", service()).await;
        let s = scraper(vec![], connector);

        let p = pod("w", "10.0.0.1", PHASE_RUNNING, &[("topomesh.io/port", "nope")]);
        assert!(s.fetch_topology(&p).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_topology_without_ip_fails_for_that_pod() {
        let s = scraper(vec![], Arc::new(MockDiscoveryConnector::new()));
        let mut p = pod("w", "10.0.0.1", PHASE_RUNNING, &[]);
        p.ip = None;

        let err = s.fetch_topology(&p).await.unwrap_err();
        assert!(matches!(err, ScrapeError::NoAddress { .. }));
        assert_eq!(err.pod(), "default/w");
    }

    #[tokio::test]
    async fn test_fetch_topology_rpc_error_names_pod() {
        let s = scraper(vec![], Arc::new(MockDiscoveryConnector::new()));
        let p = pod("unreachable", "10.0.0.9", PHASE_RUNNING, &[]);

        let err = s.fetch_topology(&p).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Rpc { .. }));
        assert_eq!(err.pod(), "default/unreachable");
    }

    #[tokio::test]
    async fn test_fetch_topology_rejects_invalid_report() {
        let connector = Arc::new(MockDiscoveryConnector::new());
        connector
            .set_topology("10.0.0.1:9090", Service::default())
            .await;
        let s = scraper(vec![], connector);

        let err = s
            .fetch_topology(&pod("w", "10.0.0.1", PHASE_RUNNING, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Invalid { .. }));
    }
}
