//! Tests for the reconciliation loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::DiscoveryConfig;
use crate::discovery::mock::MockDiscoveryConnector;
use crate::discovery::pods::PHASE_RUNNING;
use crate::discovery::{PodInfo, Scraper, StaticPodDirectory};
use crate::proto::{Component, Processor, Service};
use crate::storage::mock::MockTopologyStore;
use crate::storage::TopologyStore;

fn pod(name: &str, ip: &str) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        namespace: "default".to_string(),
        annotations: [("topomesh.io/scrape".to_string(), "true".to_string())]
            .into_iter()
            .collect(),
        phase: PHASE_RUNNING.to_string(),
        ip: Some(ip.to_string()),
    }
}

fn pending_pod(name: &str, ip: &str) -> PodInfo {
    PodInfo {
        phase: "Pending".to_string(),
        ..pod(name, ip)
    }
}

fn service(processor: &str) -> Service {
    Service {
        name: "orders".to_string(),
        components: vec![Component {
            name: "billing".to_string(),
            processors: vec![Processor {
                name: processor.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

struct Harness {
    store: Arc<MockTopologyStore>,
    directory: Arc<StaticPodDirectory>,
    connector: Arc<MockDiscoveryConnector>,
    reconciler: Reconciler,
}

fn harness(pods: Vec<PodInfo>, config: DiscoveryConfig) -> Harness {
    let store = Arc::new(MockTopologyStore::new());
    let directory = Arc::new(StaticPodDirectory::new(pods));
    let connector = Arc::new(MockDiscoveryConnector::new());
    let scraper = Scraper::new(directory.clone(), connector.clone(), &config);
    let reconciler = Reconciler::new(store.clone(), scraper, &config);
    Harness {
        store,
        directory,
        connector,
        reconciler,
    }
}

/// existing-pod is known and live, delete-pod is known but gone, new-pod is
/// live and unknown, failed-pod is unknown and not running.
async fn convergence_harness() -> Harness {
    let h = harness(
        vec![
            pod("existing-pod", "10.0.0.1"),
            pending_pod("failed-pod", "10.0.0.2"),
            pod("new-pod", "10.0.0.3"),
        ],
        DiscoveryConfig::default(),
    );
    h.store
        .upsert("default/existing-pod", &service("a"))
        .await
        .unwrap();
    h.store
        .upsert("default/delete-pod", &service("b"))
        .await
        .unwrap();
    h.connector.set_topology("10.0.0.2:9090", service("d")).await;
    h.connector.set_topology("10.0.0.3:9090", service("c")).await;
    h
}

#[tokio::test]
async fn test_pass_converges_store_to_live_pods() {
    let h = convergence_harness().await;

    let report = h
        .reconciler
        .reconcile_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report,
        PassReport {
            added: 1,
            failed: 0,
            removed: 1,
            unchanged: 1,
            listing_failed: false,
        }
    );

    let known: Vec<_> = h
        .store
        .list_known_pod_names()
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(known, vec!["default/existing-pod", "default/new-pod"]);
    assert_eq!(h.store.deleted().await, vec!["default/delete-pod"]);
    assert_eq!(h.store.upserted().await.last().unwrap(), "default/new-pod");

    // existing-pod is never re-scraped and failed-pod is never dialed.
    assert_eq!(h.connector.calls().await, vec!["10.0.0.3:9090"]);
}

#[tokio::test]
async fn test_unreachable_pod_is_retried_next_pass() {
    let h = harness(
        vec![pod("new-pod", "10.0.0.3"), pod("slow-pod", "10.0.0.4")],
        DiscoveryConfig::default(),
    );
    h.connector.set_topology("10.0.0.3:9090", service("c")).await;
    let cancel = CancellationToken::new();

    let first = h.reconciler.reconcile_once(&cancel).await.unwrap();
    assert_eq!((first.added, first.failed), (1, 1));

    h.connector.set_topology("10.0.0.4:9090", service("e")).await;
    let second = h.reconciler.reconcile_once(&cancel).await.unwrap();

    assert_eq!(second.added, 1);
    assert_eq!(second.failed, 0);
    assert_eq!(second.unchanged, 1);
    assert_eq!(h.store.list_known_pod_names().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_scrape_deadline_abandons_slow_pods_and_still_deletes() {
    let config = DiscoveryConfig {
        scrape_deadline_secs: 1,
        ..Default::default()
    };
    let h = harness(
        vec![pod("new-pod", "10.0.0.3"), pod("stuck-pod", "10.0.0.5")],
        config,
    );
    h.store
        .upsert("default/delete-pod", &service("b"))
        .await
        .unwrap();
    h.connector.set_topology("10.0.0.3:9090", service("c")).await;
    h.connector.set_hanging("10.0.0.5:9090").await;

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        h.reconciler.reconcile_once(&CancellationToken::new()),
    )
    .await
    .expect("pass should end at the scrape deadline")
    .unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.removed, 1);
    let known: Vec<_> = h
        .store
        .list_known_pod_names()
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(known, vec!["default/new-pod"]);
}

#[tokio::test]
async fn test_same_name_in_two_namespaces_are_distinct_pods() {
    let mut other = pod("worker-0", "10.0.1.1");
    other.namespace = "staging".to_string();
    let h = harness(
        vec![pod("worker-0", "10.0.0.1"), other],
        DiscoveryConfig::default(),
    );
    h.connector.set_topology("10.0.0.1:9090", service("a")).await;
    h.connector.set_topology("10.0.1.1:9090", service("a")).await;

    let report = h
        .reconciler
        .reconcile_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.added, 2);
    let known: Vec<_> = h
        .store
        .list_known_pod_names()
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(known, vec!["default/worker-0", "staging/worker-0"]);
}

#[tokio::test]
async fn test_listing_failure_deletes_nothing() {
    let h = convergence_harness().await;
    h.directory.set_fail(true).await;

    let report = h
        .reconciler
        .reconcile_once(&CancellationToken::new())
        .await
        .unwrap();

    assert!(report.listing_failed);
    assert!(h.store.deleted().await.is_empty());
    assert_eq!(h.store.list_known_pod_names().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_listing_removes_all_known_pods() {
    let h = convergence_harness().await;
    h.directory.set_pods(vec![]).await;

    let report = h
        .reconciler
        .reconcile_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.removed, 2);
    assert!(h.store.list_known_pod_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_error_is_fatal() {
    let h = convergence_harness().await;
    h.store.set_fail_on_upsert(true).await;

    let result = h.reconciler.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(ReconcileError::Store(_))));
}

#[tokio::test]
async fn test_cancelled_before_start_returns_ok() {
    let h = convergence_harness().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    h.reconciler.run(cancel).await.unwrap();

    assert!(h.connector.calls().await.is_empty());
}

#[tokio::test]
async fn test_first_pass_runs_immediately_and_cancel_stops_loop() {
    let config = DiscoveryConfig {
        interval_secs: 3600,
        ..Default::default()
    };
    let h = harness(vec![pod("new-pod", "10.0.0.3")], config);
    h.connector.set_topology("10.0.0.3:9090", service("c")).await;
    let store = h.store.clone();
    let reconciler = Arc::new(h.reconciler);

    let cancel = CancellationToken::new();
    let task = {
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.upserted().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first pass should run without waiting for the interval");

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop should stop on cancel")
        .unwrap();
    assert!(result.is_ok());
}
