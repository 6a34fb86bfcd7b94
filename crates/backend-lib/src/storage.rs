// ============================
// backend-lib/src/storage.rs
// ============================
//! Credential store abstraction with a read-only sqlite implementation.
//!
//! Schema consumed:
//! - `users`: id, username, password, salt
//! - `details`: uid, attrib, value
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{
    types::{ToSqlOutput, Value},
    Connection, OpenFlags, OptionalExtension, ToSql,
};
use thiserror::Error;

use crate::error::GatewayError;

/// Stable account identifier, as stored
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountId {
    Int(i64),
    Text(String),
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountId::Int(id) => write!(f, "{id}"),
            AccountId::Text(id) => f.write_str(id),
        }
    }
}

impl ToSql for AccountId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            AccountId::Int(id) => id.to_sql(),
            AccountId::Text(id) => id.to_sql(),
        }
    }
}

/// One row of the user table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    /// Stored hex digest, compared verbatim
    pub password_digest: String,
    pub salt: String,
}

/// Lookup failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Trait for credential store backends
///
/// Implementations must allow concurrent calls from many sessions; each call
/// is answered atomically.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find an account by username, ignoring case.
    async fn find_account_by_username(&self, username: &str) -> Result<Account, StoreError>;

    /// Fetch one attribute value for an account.
    async fn get_attribute(&self, account_id: &AccountId, key: &str) -> Result<String, StoreError>;
}

/// Read-only sqlite implementation of the `CredentialStore` trait
#[derive(Clone)]
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteCredentialStore {
    /// Open an existing user database read-only and check it answers queries.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| GatewayError::StoreUnavailable(format!("failed to open {}: {e}", path.display())))?;

        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| GatewayError::StoreUnavailable(format!("database connection failed: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Path the store was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a query on the blocking pool while holding the connection lock.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("query task failed: {e}")))?
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn find_account_by_username(&self, username: &str) -> Result<Account, StoreError> {
        let key = username.to_lowercase();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, username, password, salt FROM users WHERE LOWER(username) = ?1",
                [&key],
                |row| {
                    Ok(Account {
                        id: account_id_from(row.get::<_, Value>(0)?),
                        username: row.get(1)?,
                        password_digest: row.get(2)?,
                        salt: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn get_attribute(&self, account_id: &AccountId, key: &str) -> Result<String, StoreError> {
        let account_id = account_id.clone();
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value: Option<Value> = conn
                .query_row(
                    "SELECT value FROM details WHERE uid = ?1 AND attrib = ?2",
                    rusqlite::params![account_id, key],
                    |row| row.get(0),
                )
                .optional()?;

            match value {
                Some(Value::Integer(n)) => Ok(n.to_string()),
                Some(Value::Real(n)) => Ok(n.to_string()),
                Some(Value::Text(text)) => Ok(text),
                Some(Value::Null) | Some(Value::Blob(_)) | None => Err(StoreError::NotFound),
            }
        })
        .await
    }
}

fn account_id_from(value: Value) -> AccountId {
    match value {
        Value::Integer(id) => AccountId::Int(id),
        Value::Text(id) => AccountId::Text(id),
        Value::Real(id) => AccountId::Text(id.to_string()),
        Value::Blob(bytes) => AccountId::Text(hex::encode(bytes)),
        Value::Null => AccountId::Text(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("users.sqlite3");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, password TEXT, salt TEXT);
             CREATE TABLE details (uid INTEGER, attrib TEXT, value TEXT);
             INSERT INTO users VALUES (1, 'Sysop', 'ABCDEF', 'xyz');
             INSERT INTO users VALUES (2, 'guest', '012345', 'pepper');
             INSERT INTO details VALUES (1, 'seclevel', '255');
             INSERT INTO details VALUES (1, 'location', 'Dunedin');",
        )
        .unwrap();
        (temp_dir, path)
    }

    #[tokio::test]
    async fn test_find_account_ignores_case() {
        let (_dir, path) = fixture();
        let store = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());

        let account = store.find_account_by_username("SYSOP").await.unwrap();
        assert_eq!(account.id, AccountId::Int(1));
        assert_eq!(account.username, "Sysop");
        assert_eq!(account.password_digest, "ABCDEF");
        assert_eq!(account.salt, "xyz");
    }

    #[tokio::test]
    async fn test_find_account_missing() {
        let (_dir, path) = fixture();
        let store = SqliteCredentialStore::open(&path).unwrap();

        let err = store.find_account_by_username("nobody").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_get_attribute() {
        let (_dir, path) = fixture();
        let store = SqliteCredentialStore::open(&path).unwrap();

        let level = store.get_attribute(&AccountId::Int(1), "seclevel").await.unwrap();
        assert_eq!(level, "255");

        let err = store.get_attribute(&AccountId::Int(2), "seclevel").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn test_open_missing_database() {
        let temp_dir = TempDir::new().unwrap();
        let result = SqliteCredentialStore::open(temp_dir.path().join("users.sqlite3"));
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
    }

    #[test]
    fn test_account_id_display() {
        assert_eq!(AccountId::Int(42).to_string(), "42");
        assert_eq!(AccountId::Text("u-7".to_string()).to_string(), "u-7");
    }
}
