/*
    log.rs - Per-stream durable ordered logs

    A stream's log is created implicitly by its first append. Entries are
    keyed by OrderingKey and read back in ascending key order through
    bounded range queries.
*/

use super::errors::{StreamError, StreamResult};
use crate::core_model::{OrderingKey, StreamEvent};
use crate::core_store::SqlStore;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::RwLock;

/// Append-only ordered log per stream
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Append under `event.key`. Fails if the key is already taken.
    async fn append(&self, event: &StreamEvent) -> StreamResult<()>;

    /// Events of `stream` with keys inside `(from, to)`, ascending, at most `limit`
    async fn range(
        &self,
        stream: &str,
        from: Bound<OrderingKey>,
        to: Bound<OrderingKey>,
        limit: usize,
    ) -> StreamResult<Vec<StreamEvent>>;

    /// Largest key held in any stream; `None` for an empty or untracked log
    async fn last_key(&self) -> StreamResult<Option<OrderingKey>> {
        Ok(None)
    }
}

/// True when no key can satisfy both bounds
fn is_empty_range(from: &Bound<OrderingKey>, to: &Bound<OrderingKey>) -> bool {
    use Bound::*;
    match (from, to) {
        (Included(a), Included(b)) => a > b,
        (Included(a), Excluded(b)) | (Excluded(a), Included(b)) | (Excluded(a), Excluded(b)) => {
            a >= b
        }
        _ => false,
    }
}

/// Durable log in the `stream_events` table, sharing the object store's database
#[derive(Clone)]
pub struct SqlStreamLog {
    pool: Pool<SqliteConnectionManager>,
}

impl SqlStreamLog {
    /// The pool must point at a database migrated by [`SqlStore`]
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    pub fn from_store(store: &SqlStore) -> Self {
        Self::new(store.pool())
    }
}

fn sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// SQL predicate for one side of a composite `(key_micros, key_seq)` bound
fn bound_clause(
    bound: &Bound<OrderingKey>,
    lower: bool,
    values: &mut Vec<SqlValue>,
) -> Option<&'static str> {
    let (key, inclusive) = match bound {
        Bound::Included(key) => (key, true),
        Bound::Excluded(key) => (key, false),
        Bound::Unbounded => return None,
    };
    values.push(SqlValue::Integer(sql_int(key.micros)));
    values.push(SqlValue::Integer(sql_int(key.micros)));
    values.push(SqlValue::Integer(sql_int(key.seq)));
    Some(match (lower, inclusive) {
        (true, true) => "(key_micros > ? OR (key_micros = ? AND key_seq >= ?))",
        (true, false) => "(key_micros > ? OR (key_micros = ? AND key_seq > ?))",
        (false, true) => "(key_micros < ? OR (key_micros = ? AND key_seq <= ?))",
        (false, false) => "(key_micros < ? OR (key_micros = ? AND key_seq < ?))",
    })
}

#[async_trait]
impl StreamLog for SqlStreamLog {
    async fn append(&self, event: &StreamEvent) -> StreamResult<()> {
        let json = serde_json::to_string(event)?;
        let stream = event.stream.clone();
        let key = event.key;
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || -> StreamResult<()> {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO stream_events (stream, key_micros, key_seq, event) VALUES (?, ?, ?, ?)",
                params![stream, sql_int(key.micros), sql_int(key.seq), json],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StreamError::Log(format!("append task failed: {}", e)))?
    }

    async fn range(
        &self,
        stream: &str,
        from: Bound<OrderingKey>,
        to: Bound<OrderingKey>,
        limit: usize,
    ) -> StreamResult<Vec<StreamEvent>> {
        if limit == 0 || is_empty_range(&from, &to) {
            return Ok(Vec::new());
        }

        let mut values = vec![SqlValue::Text(stream.to_string())];
        let mut sql = String::from("SELECT event FROM stream_events WHERE stream = ?");
        for clause in [
            bound_clause(&from, true, &mut values),
            bound_clause(&to, false, &mut values),
        ]
        .into_iter()
        .flatten()
        {
            sql.push_str(" AND ");
            sql.push_str(clause);
        }
        sql.push_str(" ORDER BY key_micros ASC, key_seq ASC LIMIT ?");
        values.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> StreamResult<Vec<StreamEvent>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.iter()
                .map(|raw| serde_json::from_str(raw).map_err(StreamError::from))
                .collect()
        })
        .await
        .map_err(|e| StreamError::Log(format!("range task failed: {}", e)))?
    }

    async fn last_key(&self) -> StreamResult<Option<OrderingKey>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> StreamResult<Option<OrderingKey>> {
            let conn = pool.get()?;
            let key = conn
                .query_row(
                    "SELECT key_micros, key_seq FROM stream_events
                     ORDER BY key_micros DESC, key_seq DESC LIMIT 1",
                    [],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;
            Ok(key.map(|(micros, seq)| {
                OrderingKey::new(u64::try_from(micros).unwrap_or(0), u64::try_from(seq).unwrap_or(0))
            }))
        })
        .await
        .map_err(|e| StreamError::Log(format!("last key task failed: {}", e)))?
    }
}

/// Volatile log for tests and hosts that keep no backlog across restarts
#[derive(Default)]
pub struct MemoryStreamLog {
    streams: RwLock<HashMap<String, BTreeMap<OrderingKey, StreamEvent>>>,
}

impl MemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events in `stream`
    pub async fn len(&self, stream: &str) -> usize {
        self.streams
            .read()
            .await
            .get(stream)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StreamLog for MemoryStreamLog {
    async fn append(&self, event: &StreamEvent) -> StreamResult<()> {
        let mut streams = self.streams.write().await;
        let log = streams.entry(event.stream.clone()).or_default();
        if log.contains_key(&event.key) {
            return Err(StreamError::Log(format!(
                "key {} already used in {}",
                event.key, event.stream
            )));
        }
        log.insert(event.key, event.clone());
        Ok(())
    }

    async fn range(
        &self,
        stream: &str,
        from: Bound<OrderingKey>,
        to: Bound<OrderingKey>,
        limit: usize,
    ) -> StreamResult<Vec<StreamEvent>> {
        if is_empty_range(&from, &to) {
            return Ok(Vec::new());
        }
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream)
            .map(|log| {
                log.range((from, to))
                    .take(limit)
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn last_key(&self) -> StreamResult<Option<OrderingKey>> {
        let streams = self.streams.read().await;
        Ok(streams
            .values()
            .filter_map(|log| log.keys().next_back().copied())
            .max())
    }
}
