//! Store contracts
//!
//! Services only see these traits; the SQLite implementation is one of
//! possibly many. Implementations must commit each call atomically: a
//! failed call leaves no partial record behind.

use super::errors::StoreResult;
use crate::core_model::{
    Association, AssociationDraft, Entity, Message, MessageDraft, ObjectId, SafeEntity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable storage for authored objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist a verified message, assigning `id` and `cdate`
    async fn create_message(&self, draft: MessageDraft) -> StoreResult<Message>;

    /// Returns `StoreError::NotFound` if missing
    async fn get_message(&self, id: &ObjectId) -> StoreResult<Message>;

    /// Remove a message and return what was removed
    async fn delete_message(&self, id: &ObjectId) -> StoreResult<Message>;

    /// Messages with `cdate > since`, oldest first
    async fn list_messages_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;

    /// Persist a verified association, assigning `id` and `cdate`
    async fn create_association(&self, draft: AssociationDraft) -> StoreResult<Association>;

    async fn get_association(&self, id: &ObjectId) -> StoreResult<Association>;

    async fn delete_association(&self, id: &ObjectId) -> StoreResult<Association>;

    /// Associations annotating `target`, oldest first
    async fn associations_for_target(&self, target: &ObjectId) -> StoreResult<Vec<Association>>;

    /// Associations signed by `author`, oldest first
    async fn associations_by_author(&self, author: &str) -> StoreResult<Vec<Association>>;
}

/// Durable storage for registry entities and federation cursors
///
/// Every mutation reassigns `modified_at` to a value strictly greater than
/// any `modified_at` already in the store.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_entity(&self, key: &str) -> StoreResult<Entity>;

    /// Insert; `StoreError::Conflict` if the key exists
    async fn create_entity(&self, entity: &Entity) -> StoreResult<Entity>;

    /// Insert or replace every field except `cdate` of an existing record
    async fn upsert_entity(&self, entity: &Entity) -> StoreResult<Entity>;

    /// Replace an existing record; `StoreError::NotFound` if absent
    async fn update_entity(&self, entity: &Entity) -> StoreResult<Entity>;

    async fn delete_entity(&self, key: &str) -> StoreResult<()>;

    /// Entities owned by this host (`host` empty)
    async fn list_local_entities(&self) -> StoreResult<Vec<SafeEntity>>;

    /// All entities with `modified_at > since`, ascending by `modified_at`
    async fn list_entities_modified_since(&self, since: DateTime<Utc>)
        -> StoreResult<Vec<SafeEntity>>;

    /// Last `modified_at` pulled from `peer`
    async fn peer_cursor(&self, peer: &str) -> StoreResult<Option<DateTime<Utc>>>;

    async fn set_peer_cursor(&self, peer: &str, at: DateTime<Utc>) -> StoreResult<()>;
}
