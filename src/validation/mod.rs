//! Validation for data that crosses trust boundaries.
//!
//! Topology reports come from worker pods and watch requests come from
//! external callers; both are checked here before they reach the store or the
//! watcher registry.

use tonic::Status;

use crate::proto::{Component, Processor, Service, Topic, WatchRequest};

/// Length limits for validated fields.
pub mod limits {
    /// Maximum length of any entity name (service, component, processor, topic, ...).
    pub const MAX_NAME_LENGTH: usize = 253;
    /// Maximum length of a partition key in a watch request.
    pub const MAX_KEY_LENGTH: usize = 1024;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const SERVICE_NAME_EMPTY: &str = "service name cannot be empty";
    pub const COMPONENT_NAME_EMPTY: &str = "component name cannot be empty";
    pub const PROCESSOR_NAME_EMPTY: &str = "processor name cannot be empty";
    pub const SINK_NAME_EMPTY: &str = "sink name cannot be empty";
    pub const TOPIC_MISSING: &str = "topic reference is missing";
    pub const TOPIC_NAME_EMPTY: &str = "topic name cannot be empty";
    pub const NAME_TOO_LONG: &str = "name exceeds maximum length";
    pub const KEY_TOO_LONG: &str = "partition key exceeds maximum length";
}

/// A topology report that cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    /// Location of the offending element, e.g. `orders/processors/enrich`.
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

fn check_name(path: &str, name: &str, empty_msg: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::new(path, empty_msg));
    }
    if name.len() > limits::MAX_NAME_LENGTH {
        return Err(ValidationError::new(
            path,
            format!(
                "{} (max: {}, got: {})",
                errmsg::NAME_TOO_LONG,
                limits::MAX_NAME_LENGTH,
                name.len()
            ),
        ));
    }
    Ok(())
}

fn check_topic(path: &str, topic: Option<&Topic>) -> Result<(), ValidationError> {
    match topic {
        Some(t) => check_name(path, &t.name, errmsg::TOPIC_NAME_EMPTY),
        None => Err(ValidationError::new(path, errmsg::TOPIC_MISSING)),
    }
}

fn validate_processor(path: &str, processor: &Processor) -> Result<(), ValidationError> {
    check_name(path, &processor.name, errmsg::PROCESSOR_NAME_EMPTY)?;
    let path = format!("{}/{}", path, processor.name);

    let edges = [
        ("inputs", &processor.inputs),
        ("joins", &processor.joins),
        ("lookups", &processor.lookups),
        ("outputs", &processor.outputs),
    ];
    for (kind, topics) in edges {
        for topic in topics.iter() {
            check_topic(&format!("{}/{}", path, kind), Some(topic))?;
        }
    }

    if let Some(persistence) = &processor.persistence {
        check_topic(&format!("{}/persistence", path), Some(persistence))?;
    }
    Ok(())
}

fn validate_component(path: &str, component: &Component) -> Result<(), ValidationError> {
    check_name(path, &component.name, errmsg::COMPONENT_NAME_EMPTY)?;
    let path = format!("{}/{}", path, component.name);

    for processor in &component.processors {
        validate_processor(&format!("{}/processors", path), processor)?;
    }
    for source in &component.sources {
        check_topic(&format!("{}/sources", path), source.topic.as_ref())?;
    }
    for view in &component.views {
        check_topic(&format!("{}/views", path), view.topic.as_ref())?;
    }

    let named = component
        .sinks
        .iter()
        .map(|s| ("sinks", &s.name, s.topic.as_ref()))
        .chain(
            component
                .view_sources
                .iter()
                .map(|s| ("view_sources", &s.name, s.topic.as_ref())),
        )
        .chain(
            component
                .view_sinks
                .iter()
                .map(|s| ("view_sinks", &s.name, s.topic.as_ref())),
        );
    for (kind, name, topic) in named {
        let kind_path = format!("{}/{}", path, kind);
        check_name(&kind_path, name, errmsg::SINK_NAME_EMPTY)?;
        check_topic(&format!("{}/{}", kind_path, name), topic)?;
    }
    Ok(())
}

/// Validate a reported service topology.
///
/// Rules:
/// - Every service, component, processor, sink, view source and view sink has
///   a non-empty name of at most 253 bytes
/// - Every source, view, sink, view source and view sink references a topic
/// - Every referenced topic has a non-empty name
pub fn validate_topology(service: &Service) -> Result<(), ValidationError> {
    check_name("service", &service.name, errmsg::SERVICE_NAME_EMPTY)?;
    let path = format!("{}/components", service.name);
    for component in &service.components {
        validate_component(&path, component)?;
    }
    Ok(())
}

/// Validate a watch request received over gRPC.
pub fn validate_watch_request(request: &WatchRequest) -> Result<(), Status> {
    check_name("component", &request.component, errmsg::COMPONENT_NAME_EMPTY)
        .map_err(|e| Status::invalid_argument(e.to_string()))?;
    check_name("processor", &request.processor, errmsg::PROCESSOR_NAME_EMPTY)
        .map_err(|e| Status::invalid_argument(e.to_string()))?;
    if request.key.len() > limits::MAX_KEY_LENGTH {
        return Err(Status::invalid_argument(format!(
            "{} (max: {}, got: {})",
            errmsg::KEY_TOO_LONG,
            limits::MAX_KEY_LENGTH,
            request.key.len()
        )));
    }
    Ok(())
}
