//! Decoded watch events.

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::proto;
use crate::proto::action::Kind;

fn lossy_utf8<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(bytes.as_ref()))
}

/// The record that triggered an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Input {
    pub topic: String,
    pub schema: String,
    #[serde(serialize_with = "lossy_utf8")]
    pub value: Vec<u8>,
}

/// An unkeyed record read or written by an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub topic: String,
    pub schema: String,
    #[serde(serialize_with = "lossy_utf8")]
    pub value: Vec<u8>,
}

/// A record addressed by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyedRecord {
    pub topic: String,
    pub schema: String,
    pub key: String,
    #[serde(serialize_with = "lossy_utf8")]
    pub value: Vec<u8>,
}

/// One step a processor took while handling an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Join(Record),
    Lookup(KeyedRecord),
    GetState(Record),
    SetState(Record),
    Output(KeyedRecord),
}

/// An input plus the ordered actions taken for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub input: Option<Input>,
    pub actions: Vec<Action>,
}

impl From<proto::Input> for Input {
    fn from(i: proto::Input) -> Self {
        Self {
            topic: i.topic,
            schema: i.schema,
            value: i.value,
        }
    }
}

impl Action {
    /// Decode a wire action; `None` if it carries no payload.
    pub fn from_proto(action: proto::Action) -> Option<Self> {
        let action = match action.kind? {
            Kind::Join(j) => Action::Join(Record {
                topic: j.topic,
                schema: j.schema,
                value: j.value,
            }),
            Kind::Lookup(l) => Action::Lookup(KeyedRecord {
                topic: l.topic,
                schema: l.schema,
                key: l.key,
                value: l.value,
            }),
            Kind::GetState(g) => Action::GetState(Record {
                topic: g.topic,
                schema: g.schema,
                value: g.value,
            }),
            Kind::SetState(s) => Action::SetState(Record {
                topic: s.topic,
                schema: s.schema,
                value: s.value,
            }),
            Kind::Output(o) => Action::Output(KeyedRecord {
                topic: o.topic,
                schema: o.schema,
                key: o.key,
                value: o.value,
            }),
        };
        Some(action)
    }
}

impl From<proto::Operation> for Operation {
    fn from(op: proto::Operation) -> Self {
        let total = op.actions.len();
        let actions: Vec<Action> = op
            .actions
            .into_iter()
            .filter_map(Action::from_proto)
            .collect();
        if actions.len() < total {
            debug!(dropped = total - actions.len(), "dropped actions without payload");
        }
        Self {
            input: op.input.map(Input::from),
            actions,
        }
    }
}
