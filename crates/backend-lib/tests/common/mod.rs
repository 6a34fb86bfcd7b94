//! Test utilities for gateway tests
//!
//! Builds a throwaway BBS directory: a `talisman.ini`, a sqlite user
//! database with the usual `users`/`details` tables and an empty log file.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use backend_lib::{
    auth::{digest::digest, DefaultAuth},
    config::{FailureDisclosure, LogFormat, ResolvedPaths, Settings},
    storage::SqliteCredentialStore,
    GatewayState,
};
use rusqlite::Connection;
use tempfile::TempDir;

pub const MIN_SECLEVEL: i64 = 100;

/// A BBS directory laid out the way the gateway expects it
pub struct TestBbs {
    pub dir: TempDir,
    pub paths: ResolvedPaths,
}

impl TestBbs {
    /// Create the directory with the standard accounts:
    /// - `Sysop` / `hunter2`, salt `xyz`, seclevel 255
    /// - `Legacy` / `oldpass`, salt `s4lt`, salt-first digest, seclevel 150
    /// - `Guest` / `guestpw`, salt `abc`, seclevel 10
    /// - `Nolevel` / `nolevel`, salt `q`, no seclevel
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(
            dir.path().join("talisman.ini"),
            "[paths]\ndata path = data\nlog path = logs\n",
        )
        .unwrap();

        let paths = ResolvedPaths {
            store_path: dir.path().join("data").join("users.sqlite3"),
            log_file: dir.path().join("logs").join("talisman.log"),
        };
        std::fs::write(&paths.log_file, "").unwrap();

        let conn = Connection::open(&paths.store_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, password TEXT, salt TEXT);
             CREATE TABLE details (uid INTEGER, attrib TEXT, value TEXT);",
        )
        .unwrap();

        let bbs = Self { dir, paths };
        bbs.add_user(1, "Sysop", &digest("hunter2", "xyz"), "xyz", Some("255"));
        bbs.add_user(2, "Legacy", &digest("s4lt", "oldpass"), "s4lt", Some("150"));
        bbs.add_user(3, "Guest", &digest("guestpw", "abc"), "abc", Some("10"));
        bbs.add_user(4, "Nolevel", &digest("nolevel", "q"), "q", None);
        bbs
    }

    pub fn add_user(&self, id: i64, username: &str, stored: &str, salt: &str, seclevel: Option<&str>) {
        let conn = Connection::open(&self.paths.store_path).unwrap();
        conn.execute(
            "INSERT INTO users (id, username, password, salt) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, username, stored, salt],
        )
        .unwrap();
        if let Some(level) = seclevel {
            conn.execute(
                "INSERT INTO details (uid, attrib, value) VALUES (?1, 'seclevel', ?2)",
                rusqlite::params![id, level],
            )
            .unwrap();
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_file(&self) -> PathBuf {
        self.paths.log_file.clone()
    }

    pub fn store(&self) -> SqliteCredentialStore {
        SqliteCredentialStore::open(&self.paths.store_path).unwrap()
    }

    pub fn settings(&self, disclosure: FailureDisclosure) -> Settings {
        Settings {
            port: 2323,
            bind_host: "127.0.0.1".parse().unwrap(),
            seclevel: MIN_SECLEVEL,
            bbs_path: self.root().to_path_buf(),
            log_level: "debug".to_string(),
            log_format: LogFormat::Text,
            poll_interval_ms: 10,
            login_timeout_secs: 5,
            failure_disclosure: disclosure,
        }
    }

    pub fn state(&self, disclosure: FailureDisclosure) -> Arc<GatewayState> {
        let auth = Arc::new(DefaultAuth::new(Arc::new(self.store()), MIN_SECLEVEL));
        Arc::new(GatewayState::new(auth, self.settings(disclosure), self.paths.clone()))
    }

    pub fn append_log(&self, text: &str) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.paths.log_file)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }
}
