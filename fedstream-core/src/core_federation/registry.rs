/*
    registry.rs - Identity / host registry

    Local administration goes through get/create/upsert/update/delete.
    Peers read get_list (what this host owns) and list_modified (everything
    changed since their cursor). Records pulled from a peer are merged with
    apply_remote:

    - a record local to the peer (empty host) is stored under the peer's host
    - records owned by this host are never overwritten from outside
    - a replica only moves forward: a copy whose origin_version is not
      newer than the stored one is ignored, whichever peer relays it
    - an unchanged record causes no write, so modified_at does not move
      and two hosts polling each other settle
    - role and score stay whatever this host assigned
*/

use super::errors::{FederationError, FederationResult};
use crate::core_model::{Entity, SafeEntity};
use crate::core_store::{EntityStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of merging one remote record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// Record owned by this host, local on this host, or older than the
    /// stored replica; left alone
    Skipped,
}

pub struct EntityRegistry {
    store: Arc<dyn EntityStore>,
    host: String,
}

impl EntityRegistry {
    /// `host` is this host's own domain
    pub fn new(store: Arc<dyn EntityStore>, host: impl Into<String>) -> Self {
        Self {
            store,
            host: host.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn get(&self, key: &str) -> FederationResult<Entity> {
        Ok(self.store.get_entity(key).await?)
    }

    pub async fn create(&self, entity: &Entity) -> FederationResult<Entity> {
        validate(entity)?;
        let stored = self.store.create_entity(entity).await?;
        info!(key = %stored.key, host = %stored.host, "Entity created");
        Ok(stored)
    }

    pub async fn upsert(&self, entity: &Entity) -> FederationResult<Entity> {
        validate(entity)?;
        Ok(self.store.upsert_entity(entity).await?)
    }

    pub async fn update(&self, entity: &Entity) -> FederationResult<Entity> {
        validate(entity)?;
        Ok(self.store.update_entity(entity).await?)
    }

    pub async fn delete(&self, key: &str) -> FederationResult<()> {
        self.store.delete_entity(key).await?;
        info!(key = %key, "Entity deleted");
        Ok(())
    }

    /// Locally owned entities, the set offered to peers
    pub async fn get_list(&self) -> FederationResult<Vec<SafeEntity>> {
        Ok(self.store.list_local_entities().await?)
    }

    /// Local and replicated entities with `modified_at > since`, oldest change first
    pub async fn list_modified(&self, since: DateTime<Utc>) -> FederationResult<Vec<SafeEntity>> {
        Ok(self.store.list_entities_modified_since(since).await?)
    }

    /// Merge one record pulled from `peer_host`
    pub async fn apply_remote(
        &self,
        peer_host: &str,
        remote: &SafeEntity,
    ) -> FederationResult<ApplyOutcome> {
        if remote.key.is_empty() {
            return Err(FederationError::Invalid(format!(
                "record from {} has an empty key",
                peer_host
            )));
        }

        let origin = if remote.host.is_empty() {
            peer_host
        } else {
            remote.host.as_str()
        };
        if origin == self.host {
            return Ok(ApplyOutcome::Skipped);
        }

        match self.store.get_entity(&remote.key).await {
            Ok(existing) => {
                if existing.is_local() {
                    debug!(key = %remote.key, peer = %peer_host, "Ignoring remote copy of a local entity");
                    return Ok(ApplyOutcome::Skipped);
                }
                if remote.origin_version <= existing.origin_version {
                    if existing.host == origin
                        && existing.meta == remote.meta
                        && existing.cdate == remote.cdate
                    {
                        return Ok(ApplyOutcome::Unchanged);
                    }
                    debug!(
                        key = %remote.key,
                        peer = %peer_host,
                        "Ignoring stale copy of a replicated entity"
                    );
                    return Ok(ApplyOutcome::Skipped);
                }

                let merged = Entity {
                    host: origin.to_string(),
                    meta: remote.meta.clone(),
                    cdate: remote.cdate,
                    origin_version: remote.origin_version,
                    ..existing
                };
                self.store.update_entity(&merged).await?;
                Ok(ApplyOutcome::Updated)
            }
            Err(StoreError::NotFound(_)) => {
                let replica = Entity {
                    key: remote.key.clone(),
                    host: origin.to_string(),
                    role: "default".to_string(),
                    score: 0,
                    meta: remote.meta.clone(),
                    cdate: remote.cdate,
                    modified_at: remote.modified_at,
                    origin_version: remote.origin_version,
                };
                self.store.create_entity(&replica).await?;
                Ok(ApplyOutcome::Inserted)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Last `modified_at` pulled from `peer`
    pub async fn peer_cursor(&self, peer: &str) -> FederationResult<Option<DateTime<Utc>>> {
        Ok(self.store.peer_cursor(peer).await?)
    }

    pub async fn set_peer_cursor(&self, peer: &str, at: DateTime<Utc>) -> FederationResult<()> {
        Ok(self.store.set_peer_cursor(peer, at).await?)
    }
}

fn validate(entity: &Entity) -> FederationResult<()> {
    if entity.key.trim().is_empty() {
        return Err(FederationError::Invalid("entity key must not be empty".to_string()));
    }
    Ok(())
}
