//! Reconstruction of the aggregate served by one pod.

use std::collections::BTreeMap;

use sea_query::{Alias, Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::Row;

use super::topology_store::Tx;
use crate::proto::{
    Component, Processor, Service, Sink, Source, Topic, View, ViewSink, ViewSource,
};
use crate::storage::schema::{Components, EdgeKind, Services};
use crate::storage::{Result, TopologyError};

/// A named, topic-bearing row as read back from sinks, view sources or view sinks.
struct NamedRow {
    component_id: i64,
    name: String,
    description: String,
    topic: Topic,
}

fn topic_from(row: &sqlx::sqlite::SqliteRow, name: &str, schema: &str) -> Result<Topic> {
    Ok(Topic {
        name: row.try_get(name)?,
        schema: row.try_get(schema)?,
    })
}

/// Rows of one topic-only membership table joined to its topic, in id order.
async fn topic_rows(
    tx: &mut Tx<'_>,
    pod_id: i64,
    edge_table: &str,
    member_col: &str,
    entity_table: &str,
) -> Result<Vec<(i64, Topic)>> {
    let sql = format!(
        "SELECT e.component_id, t.name AS topic_name, t.schema AS topic_schema
         FROM {edge_table} m
         JOIN {entity_table} e ON e.id = m.{member_col}
         JOIN topics t ON t.id = e.topic_id
         WHERE m.pod_id = ?1
         ORDER BY e.id"
    );
    let rows = sqlx::query(&sql).bind(pod_id).fetch_all(&mut **tx).await?;
    rows.iter()
        .map(|r| Ok((r.try_get("component_id")?, topic_from(r, "topic_name", "topic_schema")?)))
        .collect()
}

async fn named_rows(
    tx: &mut Tx<'_>,
    pod_id: i64,
    edge_table: &str,
    member_col: &str,
    entity_table: &str,
) -> Result<Vec<NamedRow>> {
    let sql = format!(
        "SELECT e.component_id, e.name, e.description,
                t.name AS topic_name, t.schema AS topic_schema
         FROM {edge_table} m
         JOIN {entity_table} e ON e.id = m.{member_col}
         JOIN topics t ON t.id = e.topic_id
         WHERE m.pod_id = ?1
         ORDER BY e.id"
    );
    let rows = sqlx::query(&sql).bind(pod_id).fetch_all(&mut **tx).await?;
    rows.iter()
        .map(|r| {
            Ok(NamedRow {
                component_id: r.try_get("component_id")?,
                name: r.try_get("name")?,
                description: r.try_get("description")?,
                topic: topic_from(r, "topic_name", "topic_schema")?,
            })
        })
        .collect()
}

/// Names of the services `pod_id` currently has members in, sorted.
pub(super) async fn pod_service_names(tx: &mut Tx<'_>, pod_id: i64) -> Result<Vec<String>> {
    const MEMBERS: [(&str, &str, &str); 6] = [
        ("pod_processors", "processor_id", "processors"),
        ("pod_sources", "source_id", "sources"),
        ("pod_views", "view_id", "views"),
        ("pod_sinks", "sink_id", "sinks"),
        ("pod_view_sources", "view_source_id", "view_sources"),
        ("pod_view_sinks", "view_sink_id", "view_sinks"),
    ];
    let selects: Vec<String> = MEMBERS
        .iter()
        .map(|(edge_table, member_col, entity_table)| {
            format!(
                "SELECT s.name
                 FROM {edge_table} m
                 JOIN {entity_table} e ON e.id = m.{member_col}
                 JOIN components c ON c.id = e.component_id
                 JOIN services s ON s.id = c.service_id
                 WHERE m.pod_id = ?1"
            )
        })
        .collect();
    let sql = format!("{} ORDER BY 1", selects.join(" UNION "));
    let names: Vec<String> = sqlx::query_scalar(&sql)
        .bind(pod_id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(names)
}

/// Rebuild the service `pod_id` serves, following membership edges only.
///
/// Elements of a shared component that this pod does not serve are left out.
pub(super) async fn pod_topology(
    tx: &mut Tx<'_>,
    pod: &str,
    pod_id: i64,
) -> Result<Option<Service>> {
    let processor_rows = sqlx::query(
        "SELECT p.id, p.component_id, p.name, p.description, p.group_name,
                t.name AS persistence_name, t.schema AS persistence_schema
         FROM pod_processors pp
         JOIN processors p ON p.id = pp.processor_id
         LEFT JOIN topics t ON t.id = p.persistence_topic_id
         WHERE pp.pod_id = ?1
         ORDER BY p.id",
    )
    .bind(pod_id)
    .fetch_all(&mut **tx)
    .await?;

    let edge_rows = sqlx::query(
        "SELECT pt.processor_id, pt.kind, t.name AS topic_name, t.schema AS topic_schema
         FROM pod_processors pp
         JOIN processor_topics pt ON pt.processor_id = pp.processor_id
         JOIN topics t ON t.id = pt.topic_id
         WHERE pp.pod_id = ?1
         ORDER BY pt.processor_id, pt.position, pt.id",
    )
    .bind(pod_id)
    .fetch_all(&mut **tx)
    .await?;

    let sources = topic_rows(tx, pod_id, "pod_sources", "source_id", "sources").await?;
    let views = topic_rows(tx, pod_id, "pod_views", "view_id", "views").await?;
    let sinks = named_rows(tx, pod_id, "pod_sinks", "sink_id", "sinks").await?;
    let view_sources =
        named_rows(tx, pod_id, "pod_view_sources", "view_source_id", "view_sources").await?;
    let view_sinks = named_rows(tx, pod_id, "pod_view_sinks", "view_sink_id", "view_sinks").await?;

    // Processors keyed by id so edges can be attached, then grouped by component.
    let mut processors: BTreeMap<i64, (i64, Processor)> = BTreeMap::new();
    for row in &processor_rows {
        let persistence_name: Option<String> = row.try_get("persistence_name")?;
        let persistence = match persistence_name {
            Some(name) => Some(Topic {
                name,
                schema: row.try_get::<Option<String>, _>("persistence_schema")?.unwrap_or_default(),
            }),
            None => None,
        };
        processors.insert(
            row.try_get("id")?,
            (
                row.try_get("component_id")?,
                Processor {
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    group_name: row.try_get("group_name")?,
                    persistence,
                    ..Default::default()
                },
            ),
        );
    }

    for row in &edge_rows {
        let processor_id: i64 = row.try_get("processor_id")?;
        let kind: String = row.try_get("kind")?;
        let Some((_, processor)) = processors.get_mut(&processor_id) else {
            continue;
        };
        let topic = topic_from(row, "topic_name", "topic_schema")?;
        match EdgeKind::parse(&kind) {
            Some(EdgeKind::Input) => processor.inputs.push(topic),
            Some(EdgeKind::Join) => processor.joins.push(topic),
            Some(EdgeKind::Lookup) => processor.lookups.push(topic),
            Some(EdgeKind::Output) => processor.outputs.push(topic),
            None => {
                return Err(TopologyError::Database(format!(
                    "unknown edge kind {kind:?} on processor {processor_id}"
                )))
            }
        }
    }

    let mut component_ids: Vec<i64> = processors
        .values()
        .map(|(component_id, _)| *component_id)
        .chain(sources.iter().map(|(c, _)| *c))
        .chain(views.iter().map(|(c, _)| *c))
        .chain(sinks.iter().map(|r| r.component_id))
        .chain(view_sources.iter().map(|r| r.component_id))
        .chain(view_sinks.iter().map(|r| r.component_id))
        .collect();
    component_ids.sort_unstable();
    component_ids.dedup();

    if component_ids.is_empty() {
        return Ok(None);
    }

    let (sql, values) = Query::select()
        .column((Components::Table, Components::Id))
        .column((Components::Table, Components::ServiceId))
        .column((Components::Table, Components::Name))
        .column((Components::Table, Components::Description))
        .expr_as(
            Expr::col((Services::Table, Services::Name)),
            Alias::new("service_name"),
        )
        .expr_as(
            Expr::col((Services::Table, Services::Description)),
            Alias::new("service_description"),
        )
        .from(Components::Table)
        .inner_join(
            Services::Table,
            Expr::col((Services::Table, Services::Id))
                .equals((Components::Table, Components::ServiceId)),
        )
        .and_where(Expr::col((Components::Table, Components::Id)).is_in(component_ids))
        .order_by((Components::Table, Components::Id), Order::Asc)
        .build_sqlx(SqliteQueryBuilder);
    let component_rows = sqlx::query_with(&sql, values).fetch_all(&mut **tx).await?;

    let mut service: Option<(i64, Service)> = None;
    let mut service_ids = Vec::new();
    let mut components: BTreeMap<i64, Component> = BTreeMap::new();
    for row in &component_rows {
        let service_id: i64 = row.try_get("service_id")?;
        if !service_ids.contains(&service_id) {
            service_ids.push(service_id);
        }
        if service.is_none() {
            service = Some((
                service_id,
                Service {
                    name: row.try_get("service_name")?,
                    description: row.try_get("service_description")?,
                    components: Vec::new(),
                },
            ));
        }
        components.insert(
            row.try_get("id")?,
            Component {
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                ..Default::default()
            },
        );
    }

    if service_ids.len() > 1 {
        return Err(TopologyError::Inconsistent {
            pod: pod.to_string(),
            count: service_ids.len(),
        });
    }
    let Some((_, mut service)) = service else {
        return Ok(None);
    };

    for (component_id, processor) in processors.into_values() {
        if let Some(component) = components.get_mut(&component_id) {
            component.processors.push(processor);
        }
    }
    for (component_id, topic) in sources {
        if let Some(component) = components.get_mut(&component_id) {
            component.sources.push(Source { topic: Some(topic) });
        }
    }
    for (component_id, topic) in views {
        if let Some(component) = components.get_mut(&component_id) {
            component.views.push(View { topic: Some(topic) });
        }
    }
    for row in sinks {
        if let Some(component) = components.get_mut(&row.component_id) {
            component.sinks.push(Sink {
                name: row.name,
                description: row.description,
                topic: Some(row.topic),
            });
        }
    }
    for row in view_sources {
        if let Some(component) = components.get_mut(&row.component_id) {
            component.view_sources.push(ViewSource {
                name: row.name,
                description: row.description,
                topic: Some(row.topic),
            });
        }
    }
    for row in view_sinks {
        if let Some(component) = components.get_mut(&row.component_id) {
            component.view_sinks.push(ViewSink {
                name: row.name,
                description: row.description,
                topic: Some(row.topic),
            });
        }
    }

    service.components = components.into_values().collect();
    Ok(Some(service))
}
