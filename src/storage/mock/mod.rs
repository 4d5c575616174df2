//! Mock topology store for testing.
//!
//! Keeps each pod's report verbatim instead of normalizing it. Good enough to
//! drive the reconciler and the subscription aggregator without SQLite.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ProcessorId, ProcessorPlacement, Result, TopologyError, TopologyStore};
use crate::proto::{Component, Service};
use crate::validation::validate_topology;

/// Natural key of a processor: (service, component, processor).
type ProcessorKey = (String, String, String);

#[derive(Default)]
struct State {
    reports: HashMap<String, Service>,
    processor_ids: HashMap<ProcessorKey, i64>,
    next_id: i64,
}

/// Mock topology store that keeps reports in memory.
#[derive(Default)]
pub struct MockTopologyStore {
    state: RwLock<State>,
    upserts: RwLock<Vec<String>>,
    deletes: RwLock<Vec<String>>,
    fail_on_upsert: RwLock<bool>,
    fail_on_list: RwLock<bool>,
    fail_on_delete: RwLock<bool>,
    fail_on_resolve: RwLock<bool>,
}

fn component_is_empty(c: &Component) -> bool {
    c.processors.is_empty()
        && c.sources.is_empty()
        && c.views.is_empty()
        && c.sinks.is_empty()
        && c.view_sources.is_empty()
        && c.view_sinks.is_empty()
}

fn failure(op: &str) -> TopologyError {
    TopologyError::Database(format!("mock {op} failure"))
}

impl MockTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_upsert(&self, fail: bool) {
        *self.fail_on_upsert.write().await = fail;
    }

    pub async fn set_fail_on_list(&self, fail: bool) {
        *self.fail_on_list.write().await = fail;
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn set_fail_on_resolve(&self, fail: bool) {
        *self.fail_on_resolve.write().await = fail;
    }

    /// Pods passed to `upsert`, in call order.
    pub async fn upserted(&self) -> Vec<String> {
        self.upserts.read().await.clone()
    }

    /// Pods passed to `delete`, in call order.
    pub async fn deleted(&self) -> Vec<String> {
        self.deletes.read().await.clone()
    }
}

#[async_trait]
impl TopologyStore for MockTopologyStore {
    async fn upsert(&self, pod: &str, service: &Service) -> Result<()> {
        if *self.fail_on_upsert.read().await {
            return Err(failure("upsert"));
        }
        validate_topology(service).map_err(|source| TopologyError::InvalidTopology {
            pod: pod.to_string(),
            source,
        })?;
        self.upserts.write().await.push(pod.to_string());

        let mut state = self.state.write().await;
        if let Some(existing) = state.reports.get(pod) {
            if !service.components.is_empty() && existing.name != service.name {
                return Err(TopologyError::ServiceMismatch {
                    pod: pod.to_string(),
                    existing: existing.name.clone(),
                    reported: service.name.clone(),
                });
            }
        }
        if service.components.iter().all(component_is_empty) {
            state.reports.remove(pod);
            return Ok(());
        }

        for component in &service.components {
            for processor in &component.processors {
                let key = (
                    service.name.clone(),
                    component.name.clone(),
                    processor.name.clone(),
                );
                if !state.processor_ids.contains_key(&key) {
                    state.next_id += 1;
                    let id = state.next_id;
                    state.processor_ids.insert(key, id);
                }
            }
        }
        state.reports.insert(pod.to_string(), service.clone());
        Ok(())
    }

    async fn list_known_pod_names(&self) -> Result<BTreeSet<String>> {
        if *self.fail_on_list.read().await {
            return Err(failure("list"));
        }
        Ok(self.state.read().await.reports.keys().cloned().collect())
    }

    async fn delete(&self, pod: &str) -> Result<()> {
        if *self.fail_on_delete.read().await {
            return Err(failure("delete"));
        }
        self.deletes.write().await.push(pod.to_string());
        self.state.write().await.reports.remove(pod);
        Ok(())
    }

    async fn get_topology_for_pod(&self, pod: &str) -> Result<Option<Service>> {
        Ok(self.state.read().await.reports.get(pod).cloned())
    }

    async fn find_processor(
        &self,
        service: &str,
        component: &str,
        processor: &str,
    ) -> Result<Option<ProcessorId>> {
        let key = (
            service.to_string(),
            component.to_string(),
            processor.to_string(),
        );
        Ok(self
            .state
            .read()
            .await
            .processor_ids
            .get(&key)
            .copied()
            .map(ProcessorId))
    }

    async fn resolve_processor(&self, id: ProcessorId) -> Result<Option<ProcessorPlacement>> {
        if *self.fail_on_resolve.read().await {
            return Err(failure("resolve"));
        }
        let state = self.state.read().await;
        let Some(((service, component, processor), _)) =
            state.processor_ids.iter().find(|(_, v)| **v == id.0)
        else {
            return Ok(None);
        };

        let mut pods: Vec<String> = state
            .reports
            .iter()
            .filter(|(_, report)| {
                report.name == *service
                    && report.components.iter().any(|c| {
                        c.name == *component && c.processors.iter().any(|p| p.name == *processor)
                    })
            })
            .map(|(pod, _)| pod.clone())
            .collect();
        pods.sort();

        Ok(Some(ProcessorPlacement {
            id,
            component: component.clone(),
            processor: processor.clone(),
            pods,
        }))
    }
}
