//! User records
//!
//! Minimal CRUD store for bot users, keyed by the external `user_id`
//! (e.g. a Telegram id) with a local autoincrement `id`.

use crate::cache::open_connection;
use crate::config::StorageConfig;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// User store errors
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user already exists: {0}")]
    AlreadyExists(i64),

    #[error("user not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("user store lock poisoned")]
    Poisoned,
}

pub type UserResult<T> = std::result::Result<T, UserError>;

/// Payload for creating a user; `id` is the external user id
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: i64 = row.get(5)?;
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            username: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            created_at: DateTime::from_timestamp_millis(created_at)
                .ok_or(rusqlite::Error::IntegralValueOutOfRange(5, created_at))?,
        })
    }
}

const SELECT_USER: &str =
    "SELECT id, user_id, username, first_name, last_name, created_at FROM users";

/// SQLite-backed user store
pub struct UserStore {
    conn: Mutex<Connection>,
}

impl UserStore {
    pub fn open(config: &StorageConfig) -> UserResult<Self> {
        let conn = open_connection(&config.path, config.wal_mode)
            .map_err(|e| UserError::Storage(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> UserResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> UserResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> UserResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| UserError::Poisoned)
    }

    /// Insert a user; fails with `AlreadyExists` for a known `user_id`
    pub fn create(&self, user: NewUser) -> UserResult<User> {
        let conn = self.lock()?;

        let inserted = conn.execute(
            r#"
            INSERT INTO users (user_id, username, first_name, last_name, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                user.id,
                user.username,
                user.first_name,
                user.last_name,
                Utc::now().timestamp_millis(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(UserError::AlreadyExists(user.id));
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        tracing::info!(id, user_id = user.id, "User created");

        conn.query_row(&format!("{} WHERE id = ?1", SELECT_USER), params![id], User::from_row)
            .map_err(Into::into)
    }

    pub fn list(&self) -> UserResult<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id ASC", SELECT_USER))?;
        let users = stmt
            .query_map([], User::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Look up by local row id
    pub fn get(&self, id: i64) -> UserResult<User> {
        let conn = self.lock()?;
        conn.query_row(&format!("{} WHERE id = ?1", SELECT_USER), params![id], User::from_row)
            .optional()?
            .ok_or(UserError::NotFound)
    }

    /// Look up by external user id
    pub fn get_by_user_id(&self, user_id: i64) -> UserResult<User> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{} WHERE user_id = ?1", SELECT_USER),
            params![user_id],
            User::from_row,
        )
        .optional()?
        .ok_or(UserError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_user(id: i64, username: &str) -> NewUser {
        NewUser {
            id,
            username: Some(username.to_string()),
            first_name: Some("Ada".to_string()),
            last_name: None,
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = UserStore::in_memory().unwrap();
        let user = store.create(new_user(777, "ada")).unwrap();

        assert_eq!(user.user_id, 777);
        assert_eq!(user.username.as_deref(), Some("ada"));
        assert!(user.last_name.is_none());

        assert_eq!(store.get(user.id).unwrap(), user);
        assert_eq!(store.get_by_user_id(777).unwrap(), user);
    }

    #[test]
    fn test_duplicate_user_id() {
        let store = UserStore::in_memory().unwrap();
        store.create(new_user(1, "a")).unwrap();

        let err = store.create(new_user(1, "b")).unwrap_err();
        assert!(matches!(err, UserError::AlreadyExists(1)));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_not_found() {
        let store = UserStore::in_memory().unwrap();
        assert!(matches!(store.get(42), Err(UserError::NotFound)));
        assert!(matches!(store.get_by_user_id(42), Err(UserError::NotFound)));
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let store = UserStore::in_memory().unwrap();
        let user = store.create(new_user(8, "h")).unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE users SET created_at = ?1 WHERE id = ?2",
                params![i64::MAX, user.id],
            )
            .unwrap();

        assert!(matches!(
            store.get(user.id),
            Err(UserError::Database(rusqlite::Error::IntegralValueOutOfRange(5, _)))
        ));
        assert!(store.list().is_err());
    }

    #[test]
    fn test_list_in_insertion_order() {
        let store = UserStore::in_memory().unwrap();
        store.create(new_user(30, "c")).unwrap();
        store.create(new_user(10, "a")).unwrap();

        let ids: Vec<i64> = store.list().unwrap().iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![30, 10]);
    }

    #[test]
    fn test_shares_database_file_with_cache() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            path: temp_dir.path().join("tonproxy.db"),
            wal_mode: true,
        };

        let _cache = crate::cache::SqliteCacheStore::open(&config).unwrap();
        let store = UserStore::open(&config).unwrap();
        store.create(new_user(5, "e")).unwrap();

        let reopened = UserStore::open(&config).unwrap();
        assert_eq!(reopened.get_by_user_id(5).unwrap().username.as_deref(), Some("e"));
    }

    #[test]
    fn test_new_user_payload() {
        let user: NewUser = serde_json::from_str(r#"{"id": 99, "first_name": "Bo"}"#).unwrap();
        assert_eq!(user.id, 99);
        assert!(user.username.is_none());
        assert_eq!(user.first_name.as_deref(), Some("Bo"));
    }
}
