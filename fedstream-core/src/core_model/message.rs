/*
    message.rs - Authored objects

    Messages and associations share the authored fields (author, schema,
    payload, signature). `id` and `cdate` are assigned by the store on
    commit and never come from clients.

    `payload` holds the submitted text byte-for-byte: it is the exact input
    the signature covers.
*/

use super::types::{ObjectId, ObjectKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable authored content posted to zero or more streams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: ObjectId,
    pub author: String,
    pub schema: String,
    pub payload: String,
    pub signature: String,
    pub cdate: DateTime<Utc>,
    /// Streams the message was posted to at creation
    pub streams: Vec<String>,
}

/// Signed annotation of another object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub id: ObjectId,
    pub author: String,
    pub schema: String,
    pub target: ObjectId,
    pub payload: String,
    pub signature: String,
    pub cdate: DateTime<Utc>,
    /// Streams the association was fanned out to; persisted, not exposed
    #[serde(skip)]
    pub streams: Vec<String>,
}

/// Verified message waiting for the store to assign `id` and `cdate`
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub author: String,
    pub schema: String,
    pub payload: String,
    pub signature: String,
    pub streams: Vec<String>,
}

/// Verified association waiting for the store to assign `id` and `cdate`
#[derive(Debug, Clone)]
pub struct AssociationDraft {
    pub author: String,
    pub schema: String,
    pub target: ObjectId,
    pub payload: String,
    pub signature: String,
    pub streams: Vec<String>,
}

/// Either kind of authored object, as returned by id lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredObject {
    Association(Association),
    Message(Message),
}

impl StoredObject {
    pub fn id(&self) -> &ObjectId {
        match self {
            StoredObject::Message(m) => &m.id,
            StoredObject::Association(a) => &a.id,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            StoredObject::Message(_) => ObjectKind::Message,
            StoredObject::Association(_) => ObjectKind::Association,
        }
    }

    pub fn author(&self) -> &str {
        match self {
            StoredObject::Message(m) => &m.author,
            StoredObject::Association(a) => &a.author,
        }
    }

    /// Stream membership recorded at creation time
    pub fn streams(&self) -> &[String] {
        match self {
            StoredObject::Message(m) => &m.streams,
            StoredObject::Association(a) => &a.streams,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            StoredObject::Message(m) => &m.payload,
            StoredObject::Association(a) => &a.payload,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            StoredObject::Message(m) => &m.signature,
            StoredObject::Association(a) => &a.signature,
        }
    }
}

impl From<Message> for StoredObject {
    fn from(message: Message) -> Self {
        StoredObject::Message(message)
    }
}

impl From<Association> for StoredObject {
    fn from(association: Association) -> Self {
        StoredObject::Association(association)
    }
}

/// A message together with the associations that currently target it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWithAssociations {
    #[serde(flatten)]
    pub message: Message,
    pub associations: Vec<Association>,
}

/// Body of a delete request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub id: ObjectId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_model::types::now_micros;

    fn sample_message() -> Message {
        Message {
            id: ObjectId::new("m-1"),
            author: "ab".repeat(32),
            schema: "https://schema.example/note.json".to_string(),
            payload: r#"{"signer":"x","schema":"s"}"#.to_string(),
            signature: "00".repeat(64),
            cdate: now_micros(),
            streams: vec!["s1".to_string()],
        }
    }

    #[test]
    fn test_message_wire_fields() {
        let value = serde_json::to_value(sample_message()).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["author", "cdate", "id", "payload", "schema", "signature", "streams"]
        );
    }

    #[test]
    fn test_association_wire_fields_hide_streams() {
        let association = Association {
            id: ObjectId::new("a-1"),
            author: "cd".repeat(32),
            schema: "https://schema.example/like.json".to_string(),
            target: ObjectId::new("m-1"),
            payload: "{}".to_string(),
            signature: "00".repeat(64),
            cdate: now_micros(),
            streams: vec!["s1".to_string()],
        };
        let value = serde_json::to_value(&association).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("target"));
        assert!(!obj.contains_key("streams"));
    }

    #[test]
    fn test_stored_object_accessors() {
        let object = StoredObject::from(sample_message());
        assert_eq!(object.kind(), ObjectKind::Message);
        assert_eq!(object.id().as_str(), "m-1");
        assert_eq!(object.streams(), ["s1".to_string()]);
    }

    #[test]
    fn test_delete_request_parse() {
        let req: DeleteRequest = serde_json::from_str(r#"{"id":"m-1"}"#).unwrap();
        assert_eq!(req.id, ObjectId::new("m-1"));
    }
}
