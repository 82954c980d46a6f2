//! Database migrations for the object store
//!
//! Versioned schema for messages, associations, entities, peer sync
//! cursors and stream logs. Each migration is applied atomically and
//! tracked in the schema_version table.

use super::errors::StoreResult;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::info;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Messages, associations and entities",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    author TEXT NOT NULL,
                    schema TEXT NOT NULL,
                    payload TEXT NOT NULL,                  -- exact signed text
                    signature TEXT NOT NULL,
                    cdate INTEGER NOT NULL,                 -- unix micros
                    streams TEXT NOT NULL                   -- JSON array
                );

                CREATE INDEX IF NOT EXISTS idx_messages_cdate ON messages(cdate);
                CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author);

                CREATE TABLE IF NOT EXISTS associations (
                    id TEXT PRIMARY KEY,
                    author TEXT NOT NULL,
                    schema TEXT NOT NULL,
                    target TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    signature TEXT NOT NULL,
                    cdate INTEGER NOT NULL,
                    streams TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_associations_target ON associations(target);
                CREATE INDEX IF NOT EXISTS idx_associations_author ON associations(author);

                CREATE TABLE IF NOT EXISTS entities (
                    key TEXT PRIMARY KEY,
                    host TEXT NOT NULL DEFAULT '',
                    role TEXT NOT NULL DEFAULT 'default',
                    score INTEGER NOT NULL DEFAULT 0,
                    meta TEXT NOT NULL DEFAULT 'null',      -- JSON
                    cdate INTEGER NOT NULL,
                    modified_at INTEGER NOT NULL            -- unix micros, strictly increasing
                );

                CREATE INDEX IF NOT EXISTS idx_entities_host ON entities(host);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_modified ON entities(modified_at);

                CREATE TABLE IF NOT EXISTS peer_cursors (
                    peer TEXT PRIMARY KEY,
                    last_sync INTEGER NOT NULL
                );
            "#,
        },
        Migration {
            version: 2,
            description: "Durable stream logs",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS stream_events (
                    stream TEXT NOT NULL,
                    key_micros INTEGER NOT NULL,
                    key_seq INTEGER NOT NULL,
                    event TEXT NOT NULL,                    -- JSON StreamEvent
                    PRIMARY KEY (stream, key_micros, key_seq)
                );
            "#,
        },
        Migration {
            version: 3,
            description: "Owner version on registry entities",
            up_sql: r#"
                ALTER TABLE entities ADD COLUMN origin_version INTEGER NOT NULL DEFAULT 0;
                UPDATE entities SET origin_version = modified_at WHERE host = '';
            "#,
        },
    ]
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> StoreResult<()> {
    let mut conn = pool.get()?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    for migration in get_migrations().into_iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, chrono::Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied store migration"
        );
    }

    Ok(())
}
