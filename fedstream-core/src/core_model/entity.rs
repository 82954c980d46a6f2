/*
    entity.rs - Identity / host registry records

    An Entity is either owned by this host (`host` empty) or a replica of
    a record owned by a peer. `modified_at` is reassigned by the store on
    every mutation and drives incremental federation sync.

    `origin_version` is the owner's `modified_at` for the content carried.
    The owner's store keeps it equal to `modified_at`; replicas and relays
    pass it along untouched, so any host can tell which of two copies of
    the same record is newer.
*/

use super::types::now_micros;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Registry record for a local or federated identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Globally unique key (identity fingerprint or host domain)
    pub key: String,
    /// Origin host; empty for locally owned records
    #[serde(default)]
    pub host: String,
    /// Local role assignment; never leaves this host
    #[serde(default)]
    pub role: String,
    /// Local reputation score; never leaves this host
    #[serde(default)]
    pub score: i64,
    /// Free-form public profile data
    #[serde(default)]
    pub meta: Value,
    pub cdate: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Owner's `modified_at` for this content
    #[serde(default)]
    pub origin_version: DateTime<Utc>,
}

impl Entity {
    /// New locally owned entity
    pub fn local(key: impl Into<String>) -> Self {
        let now = now_micros();
        Entity {
            key: key.into(),
            host: String::new(),
            role: "default".to_string(),
            score: 0,
            meta: Value::Null,
            cdate: now,
            modified_at: now,
            origin_version: now,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn is_local(&self) -> bool {
        self.host.is_empty()
    }

    /// Version as seen by peers: own records are versioned by `modified_at`
    pub fn version(&self) -> DateTime<Utc> {
        if self.is_local() {
            self.modified_at
        } else {
            self.origin_version
        }
    }

    /// Strip privileged fields for cross-host exposure
    pub fn to_safe(&self) -> SafeEntity {
        SafeEntity {
            key: self.key.clone(),
            host: self.host.clone(),
            meta: self.meta.clone(),
            cdate: self.cdate,
            modified_at: self.modified_at,
            origin_version: self.version(),
        }
    }
}

/// Projection of [`Entity`] that is safe to hand to peer hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeEntity {
    pub key: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub meta: Value,
    pub cdate: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub origin_version: DateTime<Utc>,
}

impl From<&Entity> for SafeEntity {
    fn from(entity: &Entity) -> Self {
        entity.to_safe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_projection_drops_privileged_fields() {
        let entity = Entity::local("ab12")
            .with_role("admin")
            .with_meta(json!({"name": "alice"}));

        let value = serde_json::to_value(entity.to_safe()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("role"));
        assert!(!obj.contains_key("score"));
        assert_eq!(obj["meta"]["name"], "alice");
    }

    #[test]
    fn test_locality() {
        assert!(Entity::local("k").is_local());
        assert!(!Entity::local("k").with_host("peer.example").is_local());
    }

    #[test]
    fn test_version_follows_ownership() {
        let mut own = Entity::local("k");
        own.modified_at = own.cdate + chrono::Duration::seconds(5);
        assert_eq!(own.to_safe().origin_version, own.modified_at);

        let mut replica = own.clone().with_host("peer.example");
        replica.origin_version = own.cdate;
        assert_eq!(replica.to_safe().origin_version, own.cdate);
        assert_eq!(replica.to_safe().modified_at, own.modified_at);
    }
}
