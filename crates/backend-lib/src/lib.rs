// ============================
// backend-lib/src/lib.rs
// ============================
//! Core of the `Talisman` log gateway: authenticate a peer against the BBS
//! user database, then stream the BBS log to it.

pub mod auth;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod metrics;
pub mod server;
pub mod session;
pub mod status;
pub mod storage;
pub mod tail;

use std::sync::Arc;

use tracing::info;

use crate::auth::{AuthService, DefaultAuth};
use crate::config::{resolve_paths, ResolvedPaths, Settings};
use crate::error::GatewayError;
use crate::status::StatusRegistry;
use crate::storage::SqliteCredentialStore;

/// State shared by every session
#[derive(Clone)]
pub struct GatewayState {
    /// Authentication service
    pub auth: Arc<dyn AuthService>,
    /// Settings
    pub settings: Arc<Settings>,
    /// Credential store and log file locations
    pub paths: ResolvedPaths,
    /// Connected-node bookkeeping
    pub status: StatusRegistry,
}

impl GatewayState {
    /// Create a new gateway state
    pub fn new(auth: Arc<dyn AuthService>, settings: Settings, paths: ResolvedPaths) -> Self {
        Self {
            auth,
            settings: Arc::new(settings),
            paths,
            status: StatusRegistry::new(),
        }
    }

    /// Resolve paths from `talisman.ini` and open the credential store.
    ///
    /// Any error here is fatal: the gateway must not start listening.
    pub fn open(settings: Settings) -> Result<Self, GatewayError> {
        let paths = resolve_paths(&settings.bbs_path)?;
        info!(log_file = %paths.log_file.display(), "resolved BBS paths");

        let store = SqliteCredentialStore::open(&paths.store_path)?;
        info!(store = %store.path().display(), "credential store opened read-only");
        let auth = Arc::new(DefaultAuth::new(Arc::new(store), settings.seclevel));
        Ok(Self::new(auth, settings, paths))
    }
}
