/*
    event.rs - Stream log entries

    A StreamEvent records one occurrence inside one stream. Its
    OrderingKey is the sort key of the stream's backlog: microsecond
    timestamp first, process-wide sequence number second.

    Subscribers only ever see the wire form `{type, action, body}`.
*/

use super::types::{ObjectId, ObjectKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Total order of events within one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct OrderingKey {
    pub micros: u64,
    pub seq: u64,
}

impl OrderingKey {
    pub const MIN: OrderingKey = OrderingKey { micros: 0, seq: 0 };
    pub const MAX: OrderingKey = OrderingKey {
        micros: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(micros: u64, seq: u64) -> Self {
        OrderingKey { micros, seq }
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.micros, self.seq)
    }
}

impl FromStr for OrderingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (micros, seq) = s
            .split_once('-')
            .ok_or_else(|| format!("ordering key '{}' is not <micros>-<seq>", s))?;
        let micros = micros
            .parse()
            .map_err(|e| format!("ordering key '{}': {}", s, e))?;
        let seq = seq
            .parse()
            .map_err(|e| format!("ordering key '{}': {}", s, e))?;
        Ok(OrderingKey { micros, seq })
    }
}

impl From<OrderingKey> for String {
    fn from(key: OrderingKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for OrderingKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What happened to the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Create,
    Delete,
}

impl StreamAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamAction::Create => "create",
            StreamAction::Delete => "delete",
        }
    }
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry announcing a live object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamElement {
    pub id: ObjectId,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Minimal reference, enough for consumers to drop a removed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventBody {
    Element(StreamElement),
    Reference(ObjectRef),
}

impl EventBody {
    pub fn id(&self) -> &ObjectId {
        match self {
            EventBody::Element(element) => &element.id,
            EventBody::Reference(reference) => &reference.id,
        }
    }
}

/// One occurrence inside one stream's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub stream: String,
    pub key: OrderingKey,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub action: StreamAction,
    pub body: EventBody,
    pub owner: String,
}

/// Subscriber-facing serialization of a [`StreamEvent`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireEvent<'a> {
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub action: StreamAction,
    pub body: &'a EventBody,
}

impl StreamEvent {
    pub fn object_id(&self) -> &ObjectId {
        self.body.id()
    }

    pub fn to_wire(&self) -> WireEvent<'_> {
        WireEvent {
            kind: self.kind,
            action: self.action,
            body: &self.body,
        }
    }

    pub fn to_wire_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_wire())
    }
}
