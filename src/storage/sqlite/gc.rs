//! Orphan sweeps.
//!
//! Foreign keys never cascade, so rows are reclaimed bottom-up: topic edges of
//! unserved processors, then the unserved entities themselves, then topics
//! nothing references, then empty components and services. Each step is an
//! anti-join against every table that can still reference the row.

use sea_query::{Expr, Query, SelectStatement};
use tracing::debug;

use super::topology_store::{execute, Tx};
use crate::storage::schema::{
    Components, Membership, ProcessorTopics, Processors, Services, Topics,
};
use crate::storage::Result;

fn column_of(table: sea_query::DynIden, column: sea_query::DynIden) -> SelectStatement {
    Query::select().column(column).from(table).to_owned()
}

/// Delete entities no pod holds a membership edge to.
///
/// Returns the number of entity rows removed.
pub(super) async fn sweep_members(tx: &mut Tx<'_>) -> Result<u64> {
    let served = column_of(
        Membership::Processor.edge_table(),
        Membership::Processor.edge_member_col(),
    );
    let edges = Query::delete()
        .from_table(ProcessorTopics::Table)
        .and_where(Expr::col(ProcessorTopics::ProcessorId).not_in_subquery(served))
        .to_owned();
    execute(tx, &edges).await?;

    let mut removed = 0;
    for membership in Membership::ALL {
        let served = column_of(membership.edge_table(), membership.edge_member_col());
        let stmt = Query::delete()
            .from_table(membership.entity_table())
            .and_where(Expr::col(membership.entity_id_col()).not_in_subquery(served))
            .to_owned();
        let n = execute(tx, &stmt).await?;
        if n > 0 {
            debug!(kind = ?membership, removed = n, "reclaimed unserved entities");
        }
        removed += n;
    }
    Ok(removed)
}

/// Delete topics no edge, persistence slot or topic-bearing entity references.
pub(super) async fn sweep_topics(tx: &mut Tx<'_>) -> Result<u64> {
    let mut stmt = Query::delete();
    stmt.from_table(Topics::Table)
        .and_where(
            Expr::col(Topics::Id).not_in_subquery(
                Query::select()
                    .column(ProcessorTopics::TopicId)
                    .from(ProcessorTopics::Table)
                    .to_owned(),
            ),
        )
        .and_where(
            // NOT IN over a NULL-bearing set is never true.
            Expr::col(Topics::Id).not_in_subquery(
                Query::select()
                    .column(Processors::PersistenceTopicId)
                    .from(Processors::Table)
                    .and_where(Expr::col(Processors::PersistenceTopicId).is_not_null())
                    .to_owned(),
            ),
        );
    for membership in Membership::ALL {
        if let Some(topic_col) = membership.entity_topic_col() {
            stmt.and_where(
                Expr::col(Topics::Id)
                    .not_in_subquery(column_of(membership.entity_table(), topic_col)),
            );
        }
    }

    let removed = execute(tx, &stmt).await?;
    if removed > 0 {
        debug!(removed, "reclaimed unreferenced topics");
    }
    Ok(removed)
}

/// Delete components owning no entity, then services owning no component.
pub(super) async fn sweep_containers(tx: &mut Tx<'_>) -> Result<u64> {
    let mut components = Query::delete();
    components.from_table(Components::Table);
    for membership in Membership::ALL {
        components.and_where(Expr::col(Components::Id).not_in_subquery(column_of(
            membership.entity_table(),
            membership.entity_component_col(),
        )));
    }
    let mut removed = execute(tx, &components).await?;

    let services = Query::delete()
        .from_table(Services::Table)
        .and_where(
            Expr::col(Services::Id).not_in_subquery(
                Query::select()
                    .column(Components::ServiceId)
                    .from(Components::Table)
                    .to_owned(),
            ),
        )
        .to_owned();
    removed += execute(tx, &services).await?;

    if removed > 0 {
        debug!(removed, "reclaimed empty components and services");
    }
    Ok(removed)
}
