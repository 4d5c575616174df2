//! Kubernetes-backed pod directory.
//!
//! Lists pods through the API server and maps each into a [`PodInfo`]. With no
//! namespace configured every namespace the service account can see is listed.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    Client,
};
use tracing::{debug, info};

use super::pods::{DirectoryError, PodDirectory, PodInfo};

/// Pod directory backed by the Kubernetes API.
pub struct K8sPodDirectory {
    client: Client,
    namespace: Option<String>,
}

impl K8sPodDirectory {
    /// Create a directory using the in-cluster (or kubeconfig) configuration.
    pub async fn new(namespace: Option<String>) -> Result<Self, DirectoryError> {
        let client = Client::try_default().await?;
        info!(
            namespace = namespace.as_deref().unwrap_or("<all>"),
            "K8s pod directory initialized"
        );
        Ok(Self::with_client(client, namespace))
    }

    pub fn with_client(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn api(&self) -> Api<Pod> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Map a Kubernetes pod into the directory's view of it.
pub fn pod_info(pod: &Pod) -> Option<PodInfo> {
    let name = pod.metadata.name.clone()?;
    let status = pod.status.as_ref();
    Some(PodInfo {
        name,
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        annotations: pod.metadata.annotations.clone().unwrap_or_default(),
        phase: status.and_then(|s| s.phase.clone()).unwrap_or_default(),
        ip: status
            .and_then(|s| s.pod_ip.clone())
            .filter(|ip| !ip.is_empty()),
    })
}

#[async_trait]
impl PodDirectory for K8sPodDirectory {
    async fn list_pods(&self) -> Result<Vec<PodInfo>, DirectoryError> {
        let list = self.api().list(&ListParams::default()).await?;
        let pods: Vec<PodInfo> = list.items.iter().filter_map(pod_info).collect();
        debug!(count = pods.len(), "listed pods");
        Ok(pods)
    }
}
