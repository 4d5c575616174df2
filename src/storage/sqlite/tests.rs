//! Unit tests for the SQLite topology store (in-memory).

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::SqliteTopologyStore;
use crate::proto::{Component, Processor, Service, Sink, Source, Topic, View, ViewSink};
use crate::storage::{TopologyError, TopologyStore};

async fn test_store() -> (SqliteTopologyStore, SqlitePool) {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("failed to create in-memory pool");

    let store = SqliteTopologyStore::new(pool.clone());
    store.migrate().await.expect("failed to migrate");
    (store, pool)
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count failed")
}

async fn topic_exists(pool: &SqlitePool, name: &str) -> bool {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM topics WHERE name = ?1")
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("topic lookup failed");
    n > 0
}

fn topic(name: &str) -> Topic {
    Topic {
        name: name.to_string(),
        schema: format!("{name}.avsc"),
    }
}

fn processor(name: &str, inputs: &[&str], outputs: &[&str]) -> Processor {
    Processor {
        name: name.to_string(),
        description: format!("{name} processor"),
        group_name: "g1".to_string(),
        inputs: inputs.iter().map(|t| topic(t)).collect(),
        outputs: outputs.iter().map(|t| topic(t)).collect(),
        ..Default::default()
    }
}

fn service(components: Vec<Component>) -> Service {
    Service {
        name: "orders".to_string(),
        description: "order pipeline".to_string(),
        components,
    }
}

fn billing(processors: Vec<Processor>) -> Component {
    Component {
        name: "billing".to_string(),
        description: "billing component".to_string(),
        processors,
        ..Default::default()
    }
}

fn full_service() -> Service {
    service(vec![Component {
        name: "billing".to_string(),
        description: "billing component".to_string(),
        processors: vec![Processor {
            joins: vec![topic("customers")],
            lookups: vec![topic("rates")],
            persistence: Some(topic("enrich-state")),
            ..processor("enrich", &["orders-in"], &["orders-out"])
        }],
        sources: vec![Source {
            topic: Some(topic("orders-in")),
        }],
        views: vec![View {
            topic: Some(topic("rates")),
        }],
        sinks: vec![Sink {
            name: "ledger".to_string(),
            description: "ledger sink".to_string(),
            topic: Some(topic("orders-out")),
        }],
        view_sinks: vec![ViewSink {
            name: "rates-cache".to_string(),
            description: String::new(),
            topic: Some(topic("rates")),
        }],
        ..Default::default()
    }])
}

#[tokio::test]
async fn test_upsert_then_read_returns_reported_topology() {
    let (store, _pool) = test_store().await;
    let svc = full_service();

    store.upsert("pod-1", &svc).await.unwrap();

    let read = store.get_topology_for_pod("pod-1").await.unwrap();
    assert_eq!(read, Some(svc));
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let (store, pool) = test_store().await;
    let svc = full_service();

    store.upsert("pod-1", &svc).await.unwrap();
    let topics = count(&pool, "topics").await;
    let edges = count(&pool, "processor_topics").await;

    store.upsert("pod-1", &svc).await.unwrap();

    assert_eq!(count(&pool, "topics").await, topics);
    assert_eq!(count(&pool, "processor_topics").await, edges);
    assert_eq!(count(&pool, "pod_processors").await, 1);
    assert_eq!(
        store.get_topology_for_pod("pod-1").await.unwrap(),
        Some(svc)
    );
}

#[tokio::test]
async fn test_upsert_replaces_processor_edges() {
    let (store, pool) = test_store().await;

    let before = service(vec![billing(vec![processor("enrich", &["a", "b"], &[])])]);
    store.upsert("pod-1", &before).await.unwrap();
    assert!(topic_exists(&pool, "b").await);

    let after = service(vec![billing(vec![processor("enrich", &["a"], &[])])]);
    store.upsert("pod-1", &after).await.unwrap();

    let read = store.get_topology_for_pod("pod-1").await.unwrap().unwrap();
    let inputs: Vec<_> = read.components[0].processors[0]
        .inputs
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(inputs, vec!["a"]);
    assert!(!topic_exists(&pool, "b").await, "orphaned topic should be swept");
}

#[tokio::test]
async fn test_upsert_keeps_topic_still_referenced_elsewhere() {
    let (store, pool) = test_store().await;

    let mut component = billing(vec![processor("enrich", &["a", "b"], &[])]);
    component.sources = vec![Source {
        topic: Some(topic("b")),
    }];
    store.upsert("pod-1", &service(vec![component.clone()])).await.unwrap();

    component.processors = vec![processor("enrich", &["a"], &[])];
    store.upsert("pod-1", &service(vec![component])).await.unwrap();

    assert!(topic_exists(&pool, "b").await);
}

#[tokio::test]
async fn test_upsert_preserves_edge_order() {
    let (store, _pool) = test_store().await;

    let svc = service(vec![billing(vec![processor("enrich", &["z", "a", "m"], &[])])]);
    store.upsert("pod-1", &svc).await.unwrap();

    let read = store.get_topology_for_pod("pod-1").await.unwrap().unwrap();
    let inputs: Vec<_> = read.components[0].processors[0]
        .inputs
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(inputs, vec!["z", "a", "m"]);
}

#[tokio::test]
async fn test_upsert_clears_persistence() {
    let (store, pool) = test_store().await;

    let mut p = processor("enrich", &["a"], &[]);
    p.persistence = Some(topic("enrich-state"));
    store.upsert("pod-1", &service(vec![billing(vec![p.clone()])])).await.unwrap();

    p.persistence = None;
    store.upsert("pod-1", &service(vec![billing(vec![p])])).await.unwrap();

    let read = store.get_topology_for_pod("pod-1").await.unwrap().unwrap();
    assert!(read.components[0].processors[0].persistence.is_none());
    assert!(!topic_exists(&pool, "enrich-state").await);
}

#[tokio::test]
async fn test_latest_report_wins_for_mutable_fields() {
    let (store, _pool) = test_store().await;

    store.upsert("pod-1", &full_service()).await.unwrap();

    let mut svc = full_service();
    svc.description = "renamed pipeline".to_string();
    svc.components[0].processors[0].group_name = "g2".to_string();
    store.upsert("pod-2", &svc).await.unwrap();

    let read = store.get_topology_for_pod("pod-1").await.unwrap().unwrap();
    assert_eq!(read.description, "renamed pipeline");
    assert_eq!(read.components[0].processors[0].group_name, "g2");
}

#[tokio::test]
async fn test_delete_keeps_elements_served_by_other_pods() {
    let (store, _pool) = test_store().await;

    let wide = service(vec![billing(vec![
        processor("enrich", &["a"], &["b"]),
        processor("audit", &["b"], &[]),
    ])]);
    let narrow = service(vec![billing(vec![processor("enrich", &["a"], &["b"])])]);
    store.upsert("pod-1", &wide).await.unwrap();
    store.upsert("pod-2", &narrow).await.unwrap();

    store.delete("pod-1").await.unwrap();

    assert_eq!(
        store.get_topology_for_pod("pod-2").await.unwrap(),
        Some(narrow)
    );
    assert!(store
        .find_processor("orders", "billing", "audit")
        .await
        .unwrap()
        .is_none());
    assert!(store
        .find_processor("orders", "billing", "enrich")
        .await
        .unwrap()
        .is_some());
    let pods = store.list_known_pod_names().await.unwrap();
    assert_eq!(pods.into_iter().collect::<Vec<_>>(), vec!["pod-2"]);
}

#[tokio::test]
async fn test_delete_last_pod_empties_store() {
    let (store, pool) = test_store().await;

    store.upsert("pod-1", &full_service()).await.unwrap();
    store.delete("pod-1").await.unwrap();

    for table in [
        "services",
        "components",
        "topics",
        "processors",
        "processor_topics",
        "sources",
        "views",
        "sinks",
        "view_sources",
        "view_sinks",
        "pods",
        "pod_processors",
        "pod_sources",
        "pod_views",
        "pod_sinks",
        "pod_view_sources",
        "pod_view_sinks",
    ] {
        assert_eq!(count(&pool, table).await, 0, "{table} not empty");
    }
}

#[tokio::test]
async fn test_delete_unknown_pod_is_noop() {
    let (store, pool) = test_store().await;

    store.upsert("pod-1", &full_service()).await.unwrap();
    let topics = count(&pool, "topics").await;

    store.delete("ghost").await.unwrap();

    assert_eq!(count(&pool, "topics").await, topics);
    assert!(store.get_topology_for_pod("pod-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_empty_report_leaves_no_pod() {
    let (store, pool) = test_store().await;

    store.upsert("pod-1", &service(vec![])).await.unwrap();

    assert!(store.list_known_pod_names().await.unwrap().is_empty());
    assert!(store.get_topology_for_pod("pod-1").await.unwrap().is_none());
    assert_eq!(count(&pool, "services").await, 0);
}

#[tokio::test]
async fn test_get_topology_only_follows_pod_memberships() {
    let (store, _pool) = test_store().await;

    store.upsert("pod-1", &full_service()).await.unwrap();
    let narrow = service(vec![billing(vec![processor("audit", &["a"], &[])])]);
    store.upsert("pod-2", &narrow).await.unwrap();

    let read = store.get_topology_for_pod("pod-2").await.unwrap().unwrap();
    assert_eq!(read.components.len(), 1);
    let component = &read.components[0];
    assert_eq!(component.processors.len(), 1);
    assert_eq!(component.processors[0].name, "audit");
    assert!(component.sinks.is_empty());
    assert!(component.sources.is_empty());
}

#[tokio::test]
async fn test_invalid_topology_rejected() {
    let (store, _pool) = test_store().await;

    let mut svc = full_service();
    svc.components[0].sinks[0].topic = None;

    let err = store.upsert("pod-1", &svc).await.unwrap_err();
    assert!(matches!(err, TopologyError::InvalidTopology { ref pod, .. } if pod == "pod-1"));
    assert!(store.list_known_pod_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upsert_under_another_service_rejected() {
    let (store, pool) = test_store().await;
    let svc = full_service();
    store.upsert("pod-1", &svc).await.unwrap();
    let services = count(&pool, "services").await;

    let mut renamed = full_service();
    renamed.name = "payments".to_string();
    let err = store.upsert("pod-1", &renamed).await.unwrap_err();

    match err {
        TopologyError::ServiceMismatch {
            pod,
            existing,
            reported,
        } => {
            assert_eq!(pod, "pod-1");
            assert_eq!(existing, "orders");
            assert_eq!(reported, "payments");
        }
        other => panic!("expected service mismatch, got {other:?}"),
    }
    assert_eq!(count(&pool, "services").await, services);
    assert_eq!(store.get_topology_for_pod("pod-1").await.unwrap(), Some(svc));
}

#[tokio::test]
async fn test_pod_name_reusable_under_new_service_after_delete() {
    let (store, _pool) = test_store().await;
    store.upsert("pod-1", &full_service()).await.unwrap();
    store.delete("pod-1").await.unwrap();

    let mut renamed = full_service();
    renamed.name = "payments".to_string();
    store.upsert("pod-1", &renamed).await.unwrap();

    assert_eq!(
        store.get_topology_for_pod("pod-1").await.unwrap(),
        Some(renamed)
    );
}

#[tokio::test]
async fn test_find_and_resolve_processor() {
    let (store, _pool) = test_store().await;

    store.upsert("pod-b", &full_service()).await.unwrap();
    store.upsert("pod-a", &full_service()).await.unwrap();

    let id = store
        .find_processor("orders", "billing", "enrich")
        .await
        .unwrap()
        .expect("processor should exist");

    let placement = store.resolve_processor(id).await.unwrap().unwrap();
    assert_eq!(placement.id, id);
    assert_eq!(placement.component, "billing");
    assert_eq!(placement.processor, "enrich");
    assert_eq!(placement.pods, vec!["pod-a".to_string(), "pod-b".to_string()]);
}

#[tokio::test]
async fn test_find_processor_unknown() {
    let (store, _pool) = test_store().await;

    store.upsert("pod-1", &full_service()).await.unwrap();

    assert!(store
        .find_processor("orders", "shipping", "enrich")
        .await
        .unwrap()
        .is_none());
    assert!(store
        .resolve_processor(crate::storage::ProcessorId(9999))
        .await
        .unwrap()
        .is_none());
}
