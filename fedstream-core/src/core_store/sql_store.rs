//! SQLite implementation of the store contracts
//!
//! All statements run on the blocking thread pool; the async methods only
//! await the result. Multi-statement operations run inside IMMEDIATE
//! transactions so that read-then-write sequences (delete returning the
//! removed row, monotonic `modified_at`) are not interleaved.

use super::errors::{StoreError, StoreResult};
use super::migrations;
use super::traits::{EntityStore, ObjectStore};
use crate::config::StoreConfig;
use crate::core_model::types::{from_micros, to_micros};
use crate::core_model::{
    now_micros, Association, AssociationDraft, Entity, Message, MessageDraft, ObjectId, SafeEntity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const MESSAGE_COLUMNS: &str = "id, author, schema, payload, signature, cdate, streams";
const ASSOCIATION_COLUMNS: &str = "id, author, schema, target, payload, signature, cdate, streams";
const ENTITY_COLUMNS: &str = "key, host, role, score, meta, cdate, modified_at, origin_version";
const SAFE_ENTITY_COLUMNS: &str = "key, host, meta, cdate, modified_at, origin_version";

/// SQL-backed object and entity store
#[derive(Clone)]
pub struct SqlStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqlStore {
    /// Wrap an existing pool and run pending migrations
    pub fn new(pool: Pool<SqliteConnectionManager>) -> StoreResult<Self> {
        migrations::migrate(&pool)?;
        Ok(Self { pool })
    }

    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Storage(format!("create {}: {}", parent.display(), e)))?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.busy_timeout(Duration::from_secs(5))
        });
        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        info!(path = %path.display(), pool_size, "Opened SQL store");
        Self::new(pool)
    }

    /// In-memory database. Each SQLite memory connection is its own
    /// database, so the pool holds exactly one connection.
    pub fn memory() -> StoreResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Self::new(pool)
    }

    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        match &config.database_path {
            Some(path) => Self::open(path, config.pool_size),
            None => Self::memory(),
        }
    }

    /// Shared connection pool, for components that keep their own tables
    /// in the same database (the durable stream log)
    pub fn pool(&self) -> Pool<SqliteConnectionManager> {
        self.pool.clone()
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            op(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("store task failed: {}", e)))?
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: ObjectId::new(row.get::<_, String>(0)?),
        author: row.get(1)?,
        schema: row.get(2)?,
        payload: row.get(3)?,
        signature: row.get(4)?,
        cdate: from_micros(row.get(5)?),
        streams: decode_json(row, 6)?,
    })
}

fn association_from_row(row: &Row<'_>) -> rusqlite::Result<Association> {
    Ok(Association {
        id: ObjectId::new(row.get::<_, String>(0)?),
        author: row.get(1)?,
        schema: row.get(2)?,
        target: ObjectId::new(row.get::<_, String>(3)?),
        payload: row.get(4)?,
        signature: row.get(5)?,
        cdate: from_micros(row.get(6)?),
        streams: decode_json(row, 7)?,
    })
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        key: row.get(0)?,
        host: row.get(1)?,
        role: row.get(2)?,
        score: row.get(3)?,
        meta: decode_json(row, 4)?,
        cdate: from_micros(row.get(5)?),
        modified_at: from_micros(row.get(6)?),
        origin_version: from_micros(row.get(7)?),
    })
}

fn safe_entity_from_row(row: &Row<'_>) -> rusqlite::Result<SafeEntity> {
    Ok(SafeEntity {
        key: row.get(0)?,
        host: row.get(1)?,
        meta: decode_json(row, 2)?,
        cdate: from_micros(row.get(3)?),
        modified_at: from_micros(row.get(4)?),
        origin_version: from_micros(row.get(5)?),
    })
}

fn select_entity(conn: &Connection, key: &str) -> StoreResult<Entity> {
    conn.query_row(
        &format!("SELECT {} FROM entities WHERE key = ?", ENTITY_COLUMNS),
        params![key],
        entity_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("entity {}", key)))
}

/// Next `modified_at`: wall clock, bumped past the newest existing value
fn next_modified(conn: &Connection) -> StoreResult<i64> {
    let last: Option<i64> =
        conn.query_row("SELECT MAX(modified_at) FROM entities", [], |row| row.get(0))?;
    let now = Utc::now().timestamp_micros();
    Ok(match last {
        Some(last) if last >= now => last + 1,
        _ => now,
    })
}

/// Own records are versioned by their own `modified_at`; replicas keep the owner's
fn origin_version(entity: &Entity, modified: i64) -> i64 {
    if entity.is_local() {
        modified
    } else {
        to_micros(&entity.origin_version)
    }
}

#[async_trait]
impl ObjectStore for SqlStore {
    async fn create_message(&self, draft: MessageDraft) -> StoreResult<Message> {
        self.run(move |conn| {
            let streams = serde_json::to_string(&draft.streams)?;
            let message = Message {
                id: ObjectId::generate(),
                author: draft.author,
                schema: draft.schema,
                payload: draft.payload,
                signature: draft.signature,
                cdate: now_micros(),
                streams: draft.streams,
            };

            conn.execute(
                &format!("INSERT INTO messages ({}) VALUES (?, ?, ?, ?, ?, ?, ?)", MESSAGE_COLUMNS),
                params![
                    message.id.as_str(),
                    &message.author,
                    &message.schema,
                    &message.payload,
                    &message.signature,
                    to_micros(&message.cdate),
                    streams,
                ],
            )?;

            debug!(id = %message.id, author = %message.author, "Stored message");
            Ok(message)
        })
        .await
    }

    async fn get_message(&self, id: &ObjectId) -> StoreResult<Message> {
        let id = id.clone();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS),
                params![id.as_str()],
                message_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))
        })
        .await
    }

    async fn delete_message(&self, id: &ObjectId) -> StoreResult<Message> {
        let id = id.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let message = tx
                .query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS),
                    params![id.as_str()],
                    message_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
            tx.execute("DELETE FROM messages WHERE id = ?", params![id.as_str()])?;
            tx.commit()?;
            Ok(message)
        })
        .await
    }

    async fn list_messages_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE cdate > ? ORDER BY cdate ASC, id ASC LIMIT ?",
                MESSAGE_COLUMNS
            ))?;
            let messages = stmt
                .query_map(params![to_micros(&since), limit as i64], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    async fn create_association(&self, draft: AssociationDraft) -> StoreResult<Association> {
        self.run(move |conn| {
            let streams = serde_json::to_string(&draft.streams)?;
            let association = Association {
                id: ObjectId::generate(),
                author: draft.author,
                schema: draft.schema,
                target: draft.target,
                payload: draft.payload,
                signature: draft.signature,
                cdate: now_micros(),
                streams: draft.streams,
            };

            conn.execute(
                &format!(
                    "INSERT INTO associations ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    ASSOCIATION_COLUMNS
                ),
                params![
                    association.id.as_str(),
                    &association.author,
                    &association.schema,
                    association.target.as_str(),
                    &association.payload,
                    &association.signature,
                    to_micros(&association.cdate),
                    streams,
                ],
            )?;

            debug!(id = %association.id, target = %association.target, "Stored association");
            Ok(association)
        })
        .await
    }

    async fn get_association(&self, id: &ObjectId) -> StoreResult<Association> {
        let id = id.clone();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM associations WHERE id = ?", ASSOCIATION_COLUMNS),
                params![id.as_str()],
                association_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("association {}", id)))
        })
        .await
    }

    async fn delete_association(&self, id: &ObjectId) -> StoreResult<Association> {
        let id = id.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let association = tx
                .query_row(
                    &format!("SELECT {} FROM associations WHERE id = ?", ASSOCIATION_COLUMNS),
                    params![id.as_str()],
                    association_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("association {}", id)))?;
            tx.execute("DELETE FROM associations WHERE id = ?", params![id.as_str()])?;
            tx.commit()?;
            Ok(association)
        })
        .await
    }

    async fn associations_for_target(&self, target: &ObjectId) -> StoreResult<Vec<Association>> {
        let target = target.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM associations WHERE target = ? ORDER BY cdate ASC, id ASC",
                ASSOCIATION_COLUMNS
            ))?;
            let associations = stmt
                .query_map(params![target.as_str()], association_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(associations)
        })
        .await
    }

    async fn associations_by_author(&self, author: &str) -> StoreResult<Vec<Association>> {
        let author = author.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM associations WHERE author = ? ORDER BY cdate ASC, id ASC",
                ASSOCIATION_COLUMNS
            ))?;
            let associations = stmt
                .query_map(params![author], association_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(associations)
        })
        .await
    }
}

#[async_trait]
impl EntityStore for SqlStore {
    async fn get_entity(&self, key: &str) -> StoreResult<Entity> {
        let key = key.to_string();
        self.run(move |conn| select_entity(conn, &key)).await
    }

    async fn create_entity(&self, entity: &Entity) -> StoreResult<Entity> {
        let entity = entity.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let modified = next_modified(&tx)?;
            let inserted = tx.execute(
                &format!(
                    "INSERT INTO entities ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(key) DO NOTHING",
                    ENTITY_COLUMNS
                ),
                params![
                    &entity.key,
                    &entity.host,
                    &entity.role,
                    entity.score,
                    serde_json::to_string(&entity.meta)?,
                    to_micros(&entity.cdate),
                    modified,
                    origin_version(&entity, modified),
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("entity {} already exists", entity.key)));
            }
            let stored = select_entity(&tx, &entity.key)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn upsert_entity(&self, entity: &Entity) -> StoreResult<Entity> {
        let entity = entity.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let modified = next_modified(&tx)?;
            tx.execute(
                &format!(
                    "INSERT INTO entities ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(key) DO UPDATE SET
                         host = excluded.host,
                         role = excluded.role,
                         score = excluded.score,
                         meta = excluded.meta,
                         modified_at = excluded.modified_at,
                         origin_version = excluded.origin_version",
                    ENTITY_COLUMNS
                ),
                params![
                    &entity.key,
                    &entity.host,
                    &entity.role,
                    entity.score,
                    serde_json::to_string(&entity.meta)?,
                    to_micros(&entity.cdate),
                    modified,
                    origin_version(&entity, modified),
                ],
            )?;
            let stored = select_entity(&tx, &entity.key)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn update_entity(&self, entity: &Entity) -> StoreResult<Entity> {
        let entity = entity.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let modified = next_modified(&tx)?;
            let updated = tx.execute(
                "UPDATE entities SET host = ?, role = ?, score = ?, meta = ?, modified_at = ?,
                     origin_version = ?
                 WHERE key = ?",
                params![
                    &entity.host,
                    &entity.role,
                    entity.score,
                    serde_json::to_string(&entity.meta)?,
                    modified,
                    origin_version(&entity, modified),
                    &entity.key,
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("entity {}", entity.key)));
            }
            let stored = select_entity(&tx, &entity.key)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn delete_entity(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.run(move |conn| {
            let deleted = conn.execute("DELETE FROM entities WHERE key = ?", params![key])?;
            if deleted == 0 {
                return Err(StoreError::NotFound(format!("entity {}", key)));
            }
            Ok(())
        })
        .await
    }

    async fn list_local_entities(&self) -> StoreResult<Vec<SafeEntity>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM entities WHERE host = '' ORDER BY modified_at ASC",
                SAFE_ENTITY_COLUMNS
            ))?;
            let entities = stmt
                .query_map([], safe_entity_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entities)
        })
        .await
    }

    async fn list_entities_modified_since(
        &self,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SafeEntity>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM entities WHERE modified_at > ? ORDER BY modified_at ASC",
                SAFE_ENTITY_COLUMNS
            ))?;
            let entities = stmt
                .query_map(params![to_micros(&since)], safe_entity_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entities)
        })
        .await
    }

    async fn peer_cursor(&self, peer: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let peer = peer.to_string();
        self.run(move |conn| {
            let micros: Option<i64> = conn
                .query_row(
                    "SELECT last_sync FROM peer_cursors WHERE peer = ?",
                    params![peer],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(micros.map(from_micros))
        })
        .await
    }

    async fn set_peer_cursor(&self, peer: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let peer = peer.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO peer_cursors (peer, last_sync) VALUES (?, ?)
                 ON CONFLICT(peer) DO UPDATE SET last_sync = excluded.last_sync",
                params![peer, to_micros(&at)],
            )?;
            Ok(())
        })
        .await
    }
}
