//! SQLite-backed topology store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sea_query::{Expr, IntoIden, OnConflict, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use super::{gc, read};
use crate::proto::{Component, Processor, Service, Topic};
use crate::storage::schema::{
    Components, EdgeKind, Membership, Pods, ProcessorTopics, Processors, Services, Sinks, Topics,
    ViewSinks, ViewSources,
};
use crate::storage::{ProcessorId, ProcessorPlacement, Result, TopologyError, TopologyStore};
use crate::validation::validate_topology;

pub(super) type Tx<'c> = Transaction<'c, Sqlite>;

/// Run a statement inside `tx`, returning the number of affected rows.
pub(super) async fn execute<S: SqlxBinder>(tx: &mut Tx<'_>, stmt: &S) -> Result<u64> {
    let (sql, values) = stmt.build_sqlx(SqliteQueryBuilder);
    let done = sqlx::query_with(&sql, values).execute(&mut **tx).await?;
    Ok(done.rows_affected())
}

/// Run an `INSERT .. RETURNING id` statement inside `tx`.
async fn fetch_id<S: SqlxBinder>(tx: &mut Tx<'_>, stmt: &S) -> Result<i64> {
    let (sql, values) = stmt.build_sqlx(SqliteQueryBuilder);
    let row = sqlx::query_with(&sql, values).fetch_one(&mut **tx).await?;
    Ok(row.try_get(0)?)
}

/// SQLite-backed topology store.
pub struct SqliteTopologyStore {
    pool: SqlitePool,
}

impl SqliteTopologyStore {
    /// Create a new SQLite topology store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a transaction that takes the database write lock up front.
    ///
    /// A deferred transaction that reads before it writes fails with
    /// `SQLITE_BUSY` instead of waiting when another writer commits first.
    async fn begin_write(&self) -> Result<Tx<'static>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("migrations/sqlite").run(&self.pool).await?;
        Ok(())
    }

    async fn upsert_pod(tx: &mut Tx<'_>, pod: &str) -> Result<i64> {
        let stmt = Query::insert()
            .into_table(Pods::Table)
            .columns([Pods::Name])
            .values_panic([pod.into()])
            .on_conflict(OnConflict::column(Pods::Name).update_column(Pods::Name).to_owned())
            .returning_col(Pods::Id)
            .to_owned();
        fetch_id(tx, &stmt).await
    }

    async fn upsert_service(tx: &mut Tx<'_>, service: &Service) -> Result<i64> {
        let stmt = Query::insert()
            .into_table(Services::Table)
            .columns([Services::Name, Services::Description])
            .values_panic([service.name.as_str().into(), service.description.as_str().into()])
            .on_conflict(
                OnConflict::column(Services::Name)
                    .update_column(Services::Description)
                    .to_owned(),
            )
            .returning_col(Services::Id)
            .to_owned();
        fetch_id(tx, &stmt).await
    }

    async fn upsert_component(
        tx: &mut Tx<'_>,
        service_id: i64,
        component: &Component,
    ) -> Result<i64> {
        let stmt = Query::insert()
            .into_table(Components::Table)
            .columns([
                Components::ServiceId,
                Components::Name,
                Components::Description,
            ])
            .values_panic([
                service_id.into(),
                component.name.as_str().into(),
                component.description.as_str().into(),
            ])
            .on_conflict(
                OnConflict::columns([Components::ServiceId, Components::Name])
                    .update_column(Components::Description)
                    .to_owned(),
            )
            .returning_col(Components::Id)
            .to_owned();
        fetch_id(tx, &stmt).await
    }

    async fn upsert_topic(tx: &mut Tx<'_>, topic: &Topic) -> Result<i64> {
        let stmt = Query::insert()
            .into_table(Topics::Table)
            .columns([Topics::Name, Topics::Schema])
            .values_panic([topic.name.as_str().into(), topic.schema.as_str().into()])
            .on_conflict(
                OnConflict::column(Topics::Name)
                    .update_column(Topics::Schema)
                    .to_owned(),
            )
            .returning_col(Topics::Id)
            .to_owned();
        fetch_id(tx, &stmt).await
    }

    async fn upsert_processor(
        tx: &mut Tx<'_>,
        component_id: i64,
        processor: &Processor,
    ) -> Result<i64> {
        let persistence_id = match &processor.persistence {
            Some(topic) => Some(Self::upsert_topic(tx, topic).await?),
            None => None,
        };

        let stmt = Query::insert()
            .into_table(Processors::Table)
            .columns([
                Processors::ComponentId,
                Processors::Name,
                Processors::Description,
                Processors::GroupName,
                Processors::PersistenceTopicId,
            ])
            .values_panic([
                component_id.into(),
                processor.name.as_str().into(),
                processor.description.as_str().into(),
                processor.group_name.as_str().into(),
                persistence_id.into(),
            ])
            .on_conflict(
                OnConflict::columns([Processors::ComponentId, Processors::Name])
                    .update_columns([
                        Processors::Description,
                        Processors::GroupName,
                        Processors::PersistenceTopicId,
                    ])
                    .to_owned(),
            )
            .returning_col(Processors::Id)
            .to_owned();
        let processor_id = fetch_id(tx, &stmt).await?;

        for kind in EdgeKind::ALL {
            let topics = match kind {
                EdgeKind::Input => &processor.inputs,
                EdgeKind::Join => &processor.joins,
                EdgeKind::Lookup => &processor.lookups,
                EdgeKind::Output => &processor.outputs,
            };
            Self::sync_edges(tx, processor_id, kind, topics).await?;
        }

        Ok(processor_id)
    }

    /// Make the `kind` edges of a processor exactly match `topics`, in order.
    async fn sync_edges(
        tx: &mut Tx<'_>,
        processor_id: i64,
        kind: EdgeKind,
        topics: &[Topic],
    ) -> Result<()> {
        let mut keep = Vec::with_capacity(topics.len());
        for (position, topic) in topics.iter().enumerate() {
            let topic_id = Self::upsert_topic(tx, topic).await?;
            let stmt = Query::insert()
                .into_table(ProcessorTopics::Table)
                .columns([
                    ProcessorTopics::ProcessorId,
                    ProcessorTopics::TopicId,
                    ProcessorTopics::Kind,
                    ProcessorTopics::Position,
                ])
                .values_panic([
                    processor_id.into(),
                    topic_id.into(),
                    kind.as_str().into(),
                    (position as i64).into(),
                ])
                .on_conflict(
                    OnConflict::columns([
                        ProcessorTopics::ProcessorId,
                        ProcessorTopics::Kind,
                        ProcessorTopics::TopicId,
                    ])
                    .update_column(ProcessorTopics::Position)
                    .to_owned(),
                )
                .to_owned();
            execute(tx, &stmt).await?;
            keep.push(topic_id);
        }

        let mut stale = Query::delete();
        stale
            .from_table(ProcessorTopics::Table)
            .and_where(Expr::col(ProcessorTopics::ProcessorId).eq(processor_id))
            .and_where(Expr::col(ProcessorTopics::Kind).eq(kind.as_str()));
        // An empty report drops every edge of this kind.
        if !keep.is_empty() {
            stale.and_where(Expr::col(ProcessorTopics::TopicId).is_not_in(keep));
        }
        let removed = execute(tx, &stale).await?;
        if removed > 0 {
            debug!(processor_id, kind = kind.as_str(), removed, "dropped stale topic edges");
        }
        Ok(())
    }

    /// Insert a row keyed by `(component_id, topic_id)` and return its id.
    async fn upsert_topic_member(
        tx: &mut Tx<'_>,
        membership: Membership,
        component_id: i64,
        topic_id: i64,
    ) -> Result<i64> {
        let topic_col = match membership.entity_topic_col() {
            Some(col) => col,
            None => return Err(TopologyError::Database("processors have no topic column".into())),
        };
        let stmt = Query::insert()
            .into_table(membership.entity_table())
            .columns([membership.entity_component_col(), topic_col.clone()])
            .values_panic([component_id.into(), topic_id.into()])
            .on_conflict(
                OnConflict::columns([membership.entity_component_col(), topic_col.clone()])
                    .update_column(topic_col)
                    .to_owned(),
            )
            .returning_col(membership.entity_id_col())
            .to_owned();
        fetch_id(tx, &stmt).await
    }

    /// Insert a named row keyed by `(component_id, name)` and return its id.
    async fn upsert_named_member(
        tx: &mut Tx<'_>,
        membership: Membership,
        component_id: i64,
        name: &str,
        description: &str,
        topic_id: i64,
    ) -> Result<i64> {
        let (table, id, component, name_col, description_col, topic) = match membership {
            Membership::Sink => (
                Sinks::Table.into_iden(),
                Sinks::Id.into_iden(),
                Sinks::ComponentId.into_iden(),
                Sinks::Name.into_iden(),
                Sinks::Description.into_iden(),
                Sinks::TopicId.into_iden(),
            ),
            Membership::ViewSource => (
                ViewSources::Table.into_iden(),
                ViewSources::Id.into_iden(),
                ViewSources::ComponentId.into_iden(),
                ViewSources::Name.into_iden(),
                ViewSources::Description.into_iden(),
                ViewSources::TopicId.into_iden(),
            ),
            Membership::ViewSink => (
                ViewSinks::Table.into_iden(),
                ViewSinks::Id.into_iden(),
                ViewSinks::ComponentId.into_iden(),
                ViewSinks::Name.into_iden(),
                ViewSinks::Description.into_iden(),
                ViewSinks::TopicId.into_iden(),
            ),
            other => {
                return Err(TopologyError::Database(format!(
                    "{:?} rows are not named",
                    other
                )))
            }
        };
        let stmt = Query::insert()
            .into_table(table)
            .columns([
                component.clone(),
                name_col.clone(),
                description_col.clone(),
                topic.clone(),
            ])
            .values_panic([
                component_id.into(),
                name.into(),
                description.into(),
                topic_id.into(),
            ])
            .on_conflict(
                OnConflict::columns([component, name_col])
                    .update_columns([description_col, topic])
                    .to_owned(),
            )
            .returning_col(id)
            .to_owned();
        fetch_id(tx, &stmt).await
    }

    async fn add_membership(
        tx: &mut Tx<'_>,
        membership: Membership,
        pod_id: i64,
        member_id: i64,
    ) -> Result<()> {
        let stmt = Query::insert()
            .into_table(membership.edge_table())
            .columns([membership.edge_pod_col(), membership.edge_member_col()])
            .values_panic([pod_id.into(), member_id.into()])
            .on_conflict(
                OnConflict::columns([membership.edge_pod_col(), membership.edge_member_col()])
                    .do_nothing()
                    .to_owned(),
            )
            .to_owned();
        execute(tx, &stmt).await?;
        Ok(())
    }

    async fn upsert_component_members(
        tx: &mut Tx<'_>,
        pod_id: i64,
        component_id: i64,
        component: &Component,
    ) -> Result<usize> {
        let mut members = 0;

        for processor in &component.processors {
            let id = Self::upsert_processor(tx, component_id, processor).await?;
            Self::add_membership(tx, Membership::Processor, pod_id, id).await?;
            members += 1;
        }

        let topic_members = component
            .sources
            .iter()
            .map(|s| (Membership::Source, s.topic.as_ref()))
            .chain(component.views.iter().map(|v| (Membership::View, v.topic.as_ref())));
        for (membership, topic) in topic_members {
            let Some(topic) = topic else { continue };
            let topic_id = Self::upsert_topic(tx, topic).await?;
            let id = Self::upsert_topic_member(tx, membership, component_id, topic_id).await?;
            Self::add_membership(tx, membership, pod_id, id).await?;
            members += 1;
        }

        let named_members = component
            .sinks
            .iter()
            .map(|s| (Membership::Sink, &s.name, &s.description, s.topic.as_ref()))
            .chain(
                component
                    .view_sources
                    .iter()
                    .map(|s| (Membership::ViewSource, &s.name, &s.description, s.topic.as_ref())),
            )
            .chain(
                component
                    .view_sinks
                    .iter()
                    .map(|s| (Membership::ViewSink, &s.name, &s.description, s.topic.as_ref())),
            );
        for (membership, name, description, topic) in named_members {
            let Some(topic) = topic else { continue };
            let topic_id = Self::upsert_topic(tx, topic).await?;
            let id = Self::upsert_named_member(
                tx,
                membership,
                component_id,
                name,
                description,
                topic_id,
            )
            .await?;
            Self::add_membership(tx, membership, pod_id, id).await?;
            members += 1;
        }

        Ok(members)
    }

    async fn pod_id(tx: &mut Tx<'_>, pod: &str) -> Result<Option<i64>> {
        let (sql, values) = Query::select()
            .column(Pods::Id)
            .from(Pods::Table)
            .and_where(Expr::col(Pods::Name).eq(pod))
            .build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get(0)?)),
            None => Ok(None),
        }
    }

    async fn has_memberships(tx: &mut Tx<'_>, pod_id: i64) -> Result<bool> {
        for membership in Membership::ALL {
            let (sql, values) = Query::select()
                .expr(Expr::col(membership.edge_pod_col()).count())
                .from(membership.edge_table())
                .and_where(Expr::col(membership.edge_pod_col()).eq(pod_id))
                .build_sqlx(SqliteQueryBuilder);
            let count: i64 = sqlx::query_with(&sql, values)
                .fetch_one(&mut **tx)
                .await?
                .try_get(0)?;
            if count > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl TopologyStore for SqliteTopologyStore {
    async fn upsert(&self, pod: &str, service: &Service) -> Result<()> {
        validate_topology(service).map_err(|source| TopologyError::InvalidTopology {
            pod: pod.to_string(),
            source,
        })?;

        let mut tx = self.begin_write().await?;

        // Memberships of two services under one pod could not be read back.
        if !service.components.is_empty() {
            if let Some(pod_id) = Self::pod_id(&mut tx, pod).await? {
                let existing = read::pod_service_names(&mut tx, pod_id).await?;
                if existing.iter().any(|name| name != &service.name) {
                    return Err(TopologyError::ServiceMismatch {
                        pod: pod.to_string(),
                        existing: existing.join(","),
                        reported: service.name.clone(),
                    });
                }
            }
        }

        let pod_id = Self::upsert_pod(&mut tx, pod).await?;
        let mut members = 0;
        if !service.components.is_empty() {
            let service_id = Self::upsert_service(&mut tx, service).await?;
            for component in &service.components {
                let component_id = Self::upsert_component(&mut tx, service_id, component).await?;
                members +=
                    Self::upsert_component_members(&mut tx, pod_id, component_id, component)
                        .await?;
            }
        }

        // A pod that serves nothing is not worth remembering.
        if members == 0 && !Self::has_memberships(&mut tx, pod_id).await? {
            let stmt = Query::delete()
                .from_table(Pods::Table)
                .and_where(Expr::col(Pods::Id).eq(pod_id))
                .to_owned();
            execute(&mut tx, &stmt).await?;
        }

        gc::sweep_topics(&mut tx).await?;
        gc::sweep_containers(&mut tx).await?;

        tx.commit().await?;

        debug!(pod, service = %service.name, members, "topology upserted");
        Ok(())
    }

    async fn list_known_pod_names(&self) -> Result<BTreeSet<String>> {
        let (sql, values) = Query::select()
            .column(Pods::Name)
            .from(Pods::Table)
            .order_by(Pods::Name, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(TopologyError::from))
            .collect()
    }

    async fn delete(&self, pod: &str) -> Result<()> {
        let mut tx = self.begin_write().await?;

        let Some(pod_id) = Self::pod_id(&mut tx, pod).await? else {
            debug!(pod, "delete of unknown pod ignored");
            return Ok(());
        };

        for membership in Membership::ALL {
            let stmt = Query::delete()
                .from_table(membership.edge_table())
                .and_where(Expr::col(membership.edge_pod_col()).eq(pod_id))
                .to_owned();
            execute(&mut tx, &stmt).await?;
        }
        let stmt = Query::delete()
            .from_table(Pods::Table)
            .and_where(Expr::col(Pods::Id).eq(pod_id))
            .to_owned();
        execute(&mut tx, &stmt).await?;

        let reclaimed = gc::sweep_members(&mut tx).await?;
        gc::sweep_topics(&mut tx).await?;
        gc::sweep_containers(&mut tx).await?;

        tx.commit().await?;

        info!(pod, reclaimed, "pod removed from topology");
        Ok(())
    }

    async fn get_topology_for_pod(&self, pod: &str) -> Result<Option<Service>> {
        let mut tx = self.pool.begin().await?;
        let service = match Self::pod_id(&mut tx, pod).await? {
            Some(pod_id) => read::pod_topology(&mut tx, pod, pod_id).await?,
            None => None,
        };
        tx.commit().await?;
        Ok(service)
    }

    async fn find_processor(
        &self,
        service: &str,
        component: &str,
        processor: &str,
    ) -> Result<Option<ProcessorId>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT p.id
             FROM processors p
             JOIN components c ON c.id = p.component_id
             JOIN services s ON s.id = c.service_id
             WHERE s.name = ?1 AND c.name = ?2 AND p.name = ?3",
        )
        .bind(service)
        .bind(component)
        .bind(processor)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map(ProcessorId))
    }

    async fn resolve_processor(&self, id: ProcessorId) -> Result<Option<ProcessorPlacement>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT p.name AS processor_name, c.name AS component_name
             FROM processors p
             JOIN components c ON c.id = p.component_id
             WHERE p.id = ?1",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let pods: Vec<String> = sqlx::query_scalar(
            "SELECT pods.name
             FROM pod_processors pp
             JOIN pods ON pods.id = pp.pod_id
             WHERE pp.processor_id = ?1
             ORDER BY pods.name",
        )
        .bind(id.0)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(ProcessorPlacement {
            id,
            component: row.try_get("component_name")?,
            processor: row.try_get("processor_name")?,
            pods,
        }))
    }
}
