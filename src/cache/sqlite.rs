//! SQLite cache implementation

use super::{CacheRecord, CacheStats, CacheStore, Event, StoreError, StoreResult};
use crate::config::StorageConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Open a SQLite database, creating the parent directory if needed
pub fn open_connection(path: &Path, wal_mode: bool) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::info!(path = %path.display(), "Opening database");

    let conn = Connection::open(path)?;

    // Enable WAL mode for better concurrency
    if wal_mode {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    conn.busy_timeout(Duration::from_secs(5))?;

    Ok(conn)
}

/// SQLite-backed transaction cache
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteCacheStore {
    /// Open or create the cache database described by `config`
    pub fn open(config: &StorageConfig) -> StoreResult<Self> {
        let conn = open_connection(&config.path, config.wal_mode)?;
        Self::from_connection(conn, Some(config.path.clone()))
    }

    /// Private in-memory database, for tests and ephemeral runs
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS transaction_cache (
            key TEXT PRIMARY KEY,
            cursor TEXT,
            is_end INTEGER NOT NULL DEFAULT 0,
            event_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache_events (
            key TEXT NOT NULL,
            seq INTEGER NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (key, seq),
            FOREIGN KEY (key) REFERENCES transaction_cache(key)
        );
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(key: &str, millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        key: key.to_string(),
        reason: format!("timestamp out of range: {}", millis),
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Load a record and its events in insertion order
fn load_record(conn: &Connection, key: &str) -> StoreResult<Option<CacheRecord>> {
    let row: Option<(Option<String>, bool, i64, i64)> = conn
        .query_row(
            "SELECT cursor, is_end, created_at, updated_at FROM transaction_cache WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let Some((cursor, is_end, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare_cached("SELECT payload FROM cache_events WHERE key = ?1 ORDER BY seq ASC")?;
    let payloads = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;

    let mut events = Vec::new();
    for payload in payloads {
        events.push(serde_json::from_str(&payload?)?);
    }

    Ok(Some(CacheRecord {
        key: key.to_string(),
        events,
        cursor,
        is_end,
        created_at: from_millis(key, created_at)?,
        updated_at: from_millis(key, updated_at)?,
    }))
}

fn insert_events(conn: &Connection, key: &str, first_seq: i64, events: &[Event]) -> StoreResult<()> {
    let mut stmt =
        conn.prepare_cached("INSERT INTO cache_events (key, seq, payload) VALUES (?1, ?2, ?3)")?;

    for (offset, event) in events.iter().enumerate() {
        let payload = serde_json::to_string(event)?;
        stmt.execute(params![key, first_seq + offset as i64, payload])?;
    }

    Ok(())
}

fn create_record(conn: &Connection, record: &CacheRecord) -> StoreResult<CacheRecord> {
    let tx = conn.unchecked_transaction()?;

    let inserted = tx.execute(
        r#"
        INSERT INTO transaction_cache (key, cursor, is_end, event_count, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            &record.key,
            record.cursor.as_deref(),
            record.is_end,
            record.events.len() as i64,
            record.created_at.timestamp_millis(),
            record.updated_at.timestamp_millis(),
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(StoreError::AlreadyExists(record.key.clone()));
        }
        Err(e) => return Err(e.into()),
    }

    insert_events(&tx, &record.key, 0, &record.events)?;

    let stored =
        load_record(&tx, &record.key)?.ok_or_else(|| StoreError::NotFound(record.key.clone()))?;
    tx.commit()?;
    Ok(stored)
}

/// Append in one transaction; any failure rolls back to the prior state
fn append_record(
    conn: &Connection,
    key: &str,
    new_events: &[Event],
    new_cursor: Option<&str>,
    new_is_end: bool,
) -> StoreResult<CacheRecord> {
    let tx = conn.unchecked_transaction()?;

    let current: Option<(bool, i64)> = tx
        .query_row(
            "SELECT is_end, event_count FROM transaction_cache WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (was_end, event_count) = current.ok_or_else(|| StoreError::NotFound(key.to_string()))?;

    insert_events(&tx, key, event_count, new_events)?;

    tx.execute(
        r#"
        UPDATE transaction_cache
        SET cursor = ?2, is_end = ?3, event_count = ?4, updated_at = ?5
        WHERE key = ?1
        "#,
        params![
            key,
            new_cursor,
            was_end || new_is_end,
            event_count + new_events.len() as i64,
            now_millis(),
        ],
    )?;

    let stored = load_record(&tx, key)?.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
    tx.commit()?;
    Ok(stored)
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn find(&self, key: &str) -> StoreResult<Option<CacheRecord>> {
        let key = key.to_string();
        self.with_conn(move |conn| load_record(conn, &key)).await
    }

    async fn create(&self, record: CacheRecord) -> StoreResult<CacheRecord> {
        let stored = self
            .with_conn(move |conn| create_record(conn, &record))
            .await?;

        tracing::debug!(key = %stored.key, events = stored.len(), "Cache record created");
        Ok(stored)
    }

    async fn append_and_update(
        &self,
        key: &str,
        new_events: Vec<Event>,
        new_cursor: Option<String>,
        new_is_end: bool,
    ) -> StoreResult<CacheRecord> {
        let appended = new_events.len();
        let owned_key = key.to_string();
        let stored = self
            .with_conn(move |conn| {
                append_record(
                    conn,
                    &owned_key,
                    &new_events,
                    new_cursor.as_deref(),
                    new_is_end,
                )
            })
            .await?;

        tracing::debug!(
            key = %key,
            appended,
            events = stored.len(),
            is_end = stored.is_end,
            "Cache record extended"
        );
        Ok(stored)
    }

    async fn stats(&self) -> StoreResult<CacheStats> {
        let (records, complete, events): (i64, i64, i64) = self
            .with_conn(|conn| {
                Ok(conn.query_row(
                    r#"
                    SELECT COUNT(*), COALESCE(SUM(is_end), 0), COALESCE(SUM(event_count), 0)
                    FROM transaction_cache
                    "#,
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?)
            })
            .await?;

        Ok(CacheStats {
            record_count: records as usize,
            complete_count: complete as usize,
            event_count: events as usize,
        })
    }
}
