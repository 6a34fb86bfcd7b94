// ============================
// backend-lib/src/status.rs
// ============================
//! Who is connected from where.
//!
//! Bookkeeping only: entries are written when an authenticated session starts
//! streaming and removed when it ends. Nothing in the authentication path
//! reads it.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use talisman_common::{NodeStatus, SessionId};
use tracing::debug;
use uuid::Uuid;

/// Process-wide status map behind a single lock
#[derive(Clone, Default)]
pub struct StatusRegistry {
    nodes: Arc<Mutex<HashMap<SessionId, NodeStatus>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session; the entry lives as long as the returned guard.
    pub fn register(&self, user: &str, location: &str) -> StatusGuard {
        let id = Uuid::new_v4();
        let status = NodeStatus {
            user: user.to_string(),
            location: location.to_string(),
        };
        let active = {
            let mut nodes = self.nodes.lock();
            nodes.insert(id, status);
            nodes.len()
        };
        debug!(session_id = %id, %user, %location, active, "node status registered");

        StatusGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Copy of the current map, for diagnostics
    pub fn snapshot(&self) -> HashMap<SessionId, NodeStatus> {
        self.nodes.lock().clone()
    }

    /// Current map rendered as JSON
    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: &SessionId) {
        let removed = self.nodes.lock().remove(id);
        if let Some(status) = removed {
            debug!(session_id = %id, user = %status.user, "node status cleared");
        }
    }
}

/// Removes its registry entry on drop
pub struct StatusGuard {
    registry: StatusRegistry,
    id: SessionId,
}

impl StatusGuard {
    pub fn session_id(&self) -> SessionId {
        self.id
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
