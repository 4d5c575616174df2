//! Sea-query schema definitions for topology tables.
//!
//! Mirrors `migrations/sqlite`. Entity tables are keyed by an integer id and a
//! natural-key UNIQUE constraint; `Pod*` tables are membership edges.

use sea_query::{DynIden, Iden, IntoIden};

#[derive(Iden, Clone, Copy)]
pub enum Services {
    Table,
    Id,
    Name,
    Description,
}

#[derive(Iden, Clone, Copy)]
pub enum Components {
    Table,
    Id,
    ServiceId,
    Name,
    Description,
}

/// Topics are shared by reference from processors, sources, views and sinks.
#[derive(Iden, Clone, Copy)]
pub enum Topics {
    Table,
    Id,
    Name,
    Schema,
}

#[derive(Iden, Clone, Copy)]
pub enum Processors {
    Table,
    Id,
    ComponentId,
    Name,
    Description,
    GroupName,
    /// Nullable; cleared when a report omits persistence.
    PersistenceTopicId,
}

/// Input/join/lookup/output edges from a processor to a topic.
#[derive(Iden, Clone, Copy)]
pub enum ProcessorTopics {
    Table,
    Id,
    ProcessorId,
    TopicId,
    Kind,
    Position,
}

#[derive(Iden, Clone, Copy)]
pub enum Sources {
    Table,
    Id,
    ComponentId,
    TopicId,
}

#[derive(Iden, Clone, Copy)]
pub enum Views {
    Table,
    Id,
    ComponentId,
    TopicId,
}

#[derive(Iden, Clone, Copy)]
pub enum Sinks {
    Table,
    Id,
    ComponentId,
    Name,
    Description,
    TopicId,
}

#[derive(Iden, Clone, Copy)]
pub enum ViewSources {
    Table,
    Id,
    ComponentId,
    Name,
    Description,
    TopicId,
}

#[derive(Iden, Clone, Copy)]
pub enum ViewSinks {
    Table,
    Id,
    ComponentId,
    Name,
    Description,
    TopicId,
}

#[derive(Iden, Clone, Copy)]
pub enum Pods {
    Table,
    Id,
    Name,
}

#[derive(Iden, Clone, Copy)]
pub enum PodProcessors {
    Table,
    PodId,
    ProcessorId,
}

#[derive(Iden, Clone, Copy)]
pub enum PodSources {
    Table,
    PodId,
    SourceId,
}

#[derive(Iden, Clone, Copy)]
pub enum PodViews {
    Table,
    PodId,
    ViewId,
}

#[derive(Iden, Clone, Copy)]
pub enum PodSinks {
    Table,
    PodId,
    SinkId,
}

#[derive(Iden, Clone, Copy)]
pub enum PodViewSources {
    Table,
    PodId,
    ViewSourceId,
}

#[derive(Iden, Clone, Copy)]
pub enum PodViewSinks {
    Table,
    PodId,
    ViewSinkId,
}

/// Processor edge kinds as stored in `processor_topics.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Input,
    Join,
    Lookup,
    Output,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::Input,
        EdgeKind::Join,
        EdgeKind::Lookup,
        EdgeKind::Output,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Input => "input",
            EdgeKind::Join => "join",
            EdgeKind::Lookup => "lookup",
            EdgeKind::Output => "output",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(EdgeKind::Input),
            "join" => Some(EdgeKind::Join),
            "lookup" => Some(EdgeKind::Lookup),
            "output" => Some(EdgeKind::Output),
            _ => None,
        }
    }
}

/// The six pod membership relations, each pairing a `pod_*` edge table with
/// the entity table it points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Processor,
    Source,
    View,
    Sink,
    ViewSource,
    ViewSink,
}

impl Membership {
    /// Processors first: their topic edges are swept before any other entity.
    pub const ALL: [Membership; 6] = [
        Membership::Processor,
        Membership::Source,
        Membership::View,
        Membership::Sink,
        Membership::ViewSource,
        Membership::ViewSink,
    ];

    /// The `pod_*` edge table.
    pub fn edge_table(self) -> DynIden {
        match self {
            Membership::Processor => PodProcessors::Table.into_iden(),
            Membership::Source => PodSources::Table.into_iden(),
            Membership::View => PodViews::Table.into_iden(),
            Membership::Sink => PodSinks::Table.into_iden(),
            Membership::ViewSource => PodViewSources::Table.into_iden(),
            Membership::ViewSink => PodViewSinks::Table.into_iden(),
        }
    }

    /// Column of the edge table holding the pod id.
    pub fn edge_pod_col(self) -> DynIden {
        match self {
            Membership::Processor => PodProcessors::PodId.into_iden(),
            Membership::Source => PodSources::PodId.into_iden(),
            Membership::View => PodViews::PodId.into_iden(),
            Membership::Sink => PodSinks::PodId.into_iden(),
            Membership::ViewSource => PodViewSources::PodId.into_iden(),
            Membership::ViewSink => PodViewSinks::PodId.into_iden(),
        }
    }

    /// Column of the edge table holding the entity id.
    pub fn edge_member_col(self) -> DynIden {
        match self {
            Membership::Processor => PodProcessors::ProcessorId.into_iden(),
            Membership::Source => PodSources::SourceId.into_iden(),
            Membership::View => PodViews::ViewId.into_iden(),
            Membership::Sink => PodSinks::SinkId.into_iden(),
            Membership::ViewSource => PodViewSources::ViewSourceId.into_iden(),
            Membership::ViewSink => PodViewSinks::ViewSinkId.into_iden(),
        }
    }

    /// The entity table the edge points into.
    pub fn entity_table(self) -> DynIden {
        match self {
            Membership::Processor => Processors::Table.into_iden(),
            Membership::Source => Sources::Table.into_iden(),
            Membership::View => Views::Table.into_iden(),
            Membership::Sink => Sinks::Table.into_iden(),
            Membership::ViewSource => ViewSources::Table.into_iden(),
            Membership::ViewSink => ViewSinks::Table.into_iden(),
        }
    }

    pub fn entity_id_col(self) -> DynIden {
        match self {
            Membership::Processor => Processors::Id.into_iden(),
            Membership::Source => Sources::Id.into_iden(),
            Membership::View => Views::Id.into_iden(),
            Membership::Sink => Sinks::Id.into_iden(),
            Membership::ViewSource => ViewSources::Id.into_iden(),
            Membership::ViewSink => ViewSinks::Id.into_iden(),
        }
    }

    /// Every entity kind is owned by a component.
    pub fn entity_component_col(self) -> DynIden {
        match self {
            Membership::Processor => Processors::ComponentId.into_iden(),
            Membership::Source => Sources::ComponentId.into_iden(),
            Membership::View => Views::ComponentId.into_iden(),
            Membership::Sink => Sinks::ComponentId.into_iden(),
            Membership::ViewSource => ViewSources::ComponentId.into_iden(),
            Membership::ViewSink => ViewSinks::ComponentId.into_iden(),
        }
    }

    /// Topic reference column; processors reference topics through
    /// `processor_topics` and `persistence_topic_id` instead.
    pub fn entity_topic_col(self) -> Option<DynIden> {
        match self {
            Membership::Processor => None,
            Membership::Source => Some(Sources::TopicId.into_iden()),
            Membership::View => Some(Views::TopicId.into_iden()),
            Membership::Sink => Some(Sinks::TopicId.into_iden()),
            Membership::ViewSource => Some(ViewSources::TopicId.into_iden()),
            Membership::ViewSink => Some(ViewSinks::TopicId.into_iden()),
        }
    }
}
