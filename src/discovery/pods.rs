//! Cluster pod directory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Phase reported by the cluster for a pod that is up and serving.
pub const PHASE_RUNNING: &str = "Running";

/// Errors listing pods.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[cfg(feature = "k8s")]
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("pod directory unavailable: {0}")]
    Unavailable(String),
}

/// A pod as seen by the cluster directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    /// Lifecycle phase, e.g. `Running` or `Pending`.
    pub phase: String,
    /// Pod IP; absent until the pod is scheduled and networked.
    pub ip: Option<String>,
}

impl PodInfo {
    pub fn is_running(&self) -> bool {
        self.phase == PHASE_RUNNING
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// RPC port from `port_annotation`, or `default` if absent or unparsable.
    pub fn rpc_port(&self, port_annotation: &str, default: u16) -> u16 {
        self.annotation(port_annotation)
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Identity of the pod across namespaces: `namespace/name`, or the bare
    /// name when the directory reports no namespace.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }

    /// `ip:port` for the pod's RPC surface, if it has an IP. IPv6 addresses
    /// are bracketed.
    pub fn rpc_address(&self, port_annotation: &str, default: u16) -> Option<String> {
        let port = self.rpc_port(port_annotation, default);
        self.ip.as_ref().map(|ip| {
            if ip.contains(':') {
                format!("[{}]:{}", ip, port)
            } else {
                format!("{}:{}", ip, port)
            }
        })
    }
}

/// Lists pods in the cluster.
#[async_trait]
pub trait PodDirectory: Send + Sync + 'static {
    async fn list_pods(&self) -> Result<Vec<PodInfo>, DirectoryError>;
}

/// In-memory pod directory for local development and tests.
#[derive(Default)]
pub struct StaticPodDirectory {
    pods: RwLock<Vec<PodInfo>>,
    fail: RwLock<bool>,
}

impl StaticPodDirectory {
    pub fn new(pods: Vec<PodInfo>) -> Self {
        Self {
            pods: RwLock::new(pods),
            fail: RwLock::new(false),
        }
    }

    /// Replace the listed pods.
    pub async fn set_pods(&self, pods: Vec<PodInfo>) {
        *self.pods.write().await = pods;
    }

    /// Make `list_pods` fail until reset.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }
}

#[async_trait]
impl PodDirectory for StaticPodDirectory {
    async fn list_pods(&self) -> Result<Vec<PodInfo>, DirectoryError> {
        if *self.fail.read().await {
            return Err(DirectoryError::Unavailable("static directory set to fail".into()));
        }
        Ok(self.pods.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(annotations: &[(&str, &str)]) -> PodInfo {
        PodInfo {
            name: "worker-0".to_string(),
            namespace: "default".to_string(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            phase: PHASE_RUNNING.to_string(),
            ip: Some("10.0.0.7".to_string()),
        }
    }

    #[test]
    fn test_rpc_port_from_annotation() {
        let p = pod(&[("topomesh.io/port", "7000")]);
        assert_eq!(p.rpc_port("topomesh.io/port", 9090), 7000);
        assert_eq!(
            p.rpc_address("topomesh.io/port", 9090).as_deref(),
            Some("10.0.0.7:7000")
        );
    }

    #[test]
    fn test_rpc_port_falls_back_on_garbage() {
        let p = pod(&[("topomesh.io/port", "http")]);
        assert_eq!(p.rpc_port("topomesh.io/port", 9090), 9090);
        assert_eq!(pod(&[]).rpc_port("topomesh.io/port", 9090), 9090);
    }

    #[test]
    fn test_rpc_address_requires_ip() {
        let mut p = pod(&[]);
        p.ip = None;
        assert!(p.rpc_address("topomesh.io/port", 9090).is_none());
    }

    #[test]
    fn test_rpc_address_brackets_ipv6() {
        let mut p = pod(&[]);
        p.ip = Some("fd00:10:244::7".to_string());
        assert_eq!(
            p.rpc_address("topomesh.io/port", 9090).as_deref(),
            Some("[fd00:10:244::7]:9090")
        );
    }

    #[test]
    fn test_qualified_name_includes_namespace() {
        let mut p = pod(&[]);
        assert_eq!(p.qualified_name(), "default/worker-0");
        p.namespace = String::new();
        assert_eq!(p.qualified_name(), "worker-0");
    }

    #[tokio::test]
    async fn test_static_directory_failure_toggle() {
        let dir = StaticPodDirectory::new(vec![pod(&[])]);
        assert_eq!(dir.list_pods().await.unwrap().len(), 1);

        dir.set_fail(true).await;
        assert!(dir.list_pods().await.is_err());
    }
}
