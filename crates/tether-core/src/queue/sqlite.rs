//! SQLite-backed queue persistence

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::request::{QueuedRequest, RequestId};
use super::store::QueueStore;
use super::{QueueError, QueueResult};
use crate::net::HttpMethod;
use crate::util::from_unix_millis;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

const SELECT_REQUESTS: &str = "SELECT id, endpoint, method, body, created_at, attempts, last_attempt_at, last_error
     FROM queued_requests
     ORDER BY created_at ASC, seq ASC";

/// Queue store that survives process restarts.
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteQueueStore {
    /// Open the queue database at `path`, creating it and any parent
    /// directories if needed. Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> QueueResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> QueueResult<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> QueueResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| QueueError::Poisoned)
    }

    fn parse_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedRequest> {
        let id: String = row.get(0)?;
        let method: String = row.get(2)?;
        let created_at: i64 = row.get(4)?;
        let last_attempt_at: Option<i64> = row.get(6)?;

        Ok(QueuedRequest {
            id: id
                .parse::<RequestId>()
                .map_err(|error| conversion_error(0, error))?,
            endpoint: row.get(1)?,
            method: method
                .parse::<HttpMethod>()
                .map_err(|error| conversion_error(2, error))?,
            body: row.get(3)?,
            created_at: from_unix_millis(created_at),
            attempts: row.get(5)?,
            last_attempt_at: last_attempt_at.map(from_unix_millis),
            last_error: row.get(7)?,
        })
    }
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
}

impl QueueStore for SqliteQueueStore {
    fn insert(&self, request: &QueuedRequest) -> QueueResult<()> {
        self.conn()?.execute(
            "INSERT INTO queued_requests
                (id, endpoint, method, body, created_at, attempts, last_attempt_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.id.as_str(),
                request.endpoint,
                request.method.as_str(),
                request.body,
                request.created_at.timestamp_millis(),
                request.attempts,
                request.last_attempt_at.map(|at| at.timestamp_millis()),
                request.last_error,
            ],
        )?;
        Ok(())
    }

    fn update(&self, request: &QueuedRequest) -> QueueResult<()> {
        self.conn()?.execute(
            "UPDATE queued_requests
             SET body = ?1, attempts = ?2, last_attempt_at = ?3, last_error = ?4
             WHERE id = ?5",
            params![
                request.body,
                request.attempts,
                request.last_attempt_at.map(|at| at.timestamp_millis()),
                request.last_error,
                request.id.as_str(),
            ],
        )?;
        Ok(())
    }

    fn remove(&self, id: &RequestId) -> QueueResult<()> {
        self.conn()?
            .execute("DELETE FROM queued_requests WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }

    fn list(&self) -> QueueResult<Vec<QueuedRequest>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(SELECT_REQUESTS)?;
        let requests = stmt
            .query_map([], Self::parse_request)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    fn count(&self) -> QueueResult<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM queued_requests", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Run all pending migrations
fn migrate(conn: &Connection) -> QueueResult<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version > CURRENT_VERSION {
        tracing::warn!(
            "Queue database schema version {} is newer than supported version {}",
            version,
            CURRENT_VERSION
        );
    }

    Ok(())
}

fn get_version(conn: &Connection) -> QueueResult<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> QueueResult<()> {
    conn.execute_batch(
        "BEGIN TRANSACTION;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS queued_requests (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            endpoint TEXT NOT NULL,
            method TEXT NOT NULL,
            body BLOB,
            created_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
            last_attempt_at INTEGER,
            last_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_queued_requests_created
            ON queued_requests(created_at, seq);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )
    .inspect_err(|_| {
        conn.execute_batch("ROLLBACK").ok();
    })?;

    tracing::info!("Migrated queue database to version 1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    fn request(endpoint: &str, body: Option<&[u8]>) -> QueuedRequest {
        QueuedRequest::new(endpoint, HttpMethod::Post, body.map(<[u8]>::to_vec))
    }

    #[test]
    fn migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn stores_and_lists_in_creation_order() {
        let store = SqliteQueueStore::open_in_memory().unwrap();
        let second = request("/v1/b", None);
        let mut first = request("/v1/a", Some(br#"{"a":1}"#));
        first.created_at = second.created_at - TimeDelta::seconds(5);

        store.insert(&second).unwrap();
        store.insert(&first).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].endpoint, "/v1/a");
        assert_eq!(listed[0].body.as_deref(), Some(br#"{"a":1}"#.as_slice()));
        assert_eq!(listed[1].endpoint, "/v1/b");
        assert_eq!(listed[1].body, None);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn update_persists_attempt_bookkeeping() {
        let store = SqliteQueueStore::open_in_memory().unwrap();
        let mut queued = request("/v1/progress", Some(b"local"));
        store.insert(&queued).unwrap();

        queued.record_attempt(Utc::now(), Some("HTTP 503".to_string()));
        queued.body = Some(b"resolved".to_vec());
        store.update(&queued).unwrap();

        let stored = store.list().unwrap().remove(0);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(stored.body.as_deref(), Some(b"resolved".as_slice()));
        assert_eq!(
            stored.last_attempt_at.map(|at| at.timestamp_millis()),
            queued.last_attempt_at.map(|at| at.timestamp_millis())
        );

        store.remove(&queued.id).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn requests_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");
        let queued = request("/v1/notes", Some(b"{}"));

        {
            let store = SqliteQueueStore::open(&path).unwrap();
            store.insert(&queued).unwrap();
        }

        let store = SqliteQueueStore::open(&path).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, queued.id);
        assert_eq!(listed[0].method, HttpMethod::Post);
    }
}
