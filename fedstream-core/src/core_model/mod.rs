/*
    core_model - Data model shared by every component

    Authored objects (messages, associations), registry entities and
    stream log entries.
*/

pub mod entity;
pub mod event;
pub mod message;
pub mod types;

pub use entity::{Entity, SafeEntity};
pub use event::{
    EventBody, ObjectRef, OrderingKey, StreamAction, StreamElement, StreamEvent, WireEvent,
};
pub use message::{
    Association, AssociationDraft, DeleteRequest, Message, MessageDraft, MessageWithAssociations,
    StoredObject,
};
pub use types::{now_micros, ObjectId, ObjectKind};
