//! Session registry
//!
//! Owns one [`SessionState`] per session id. Callers hold the per-session
//! mutex for the whole turn, which serializes turns on the same session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::state::SessionState;

/// Session id used when the caller names none
pub const DEFAULT_SESSION: &str = "default";

pub type SessionId = String;
pub type SharedSession = Arc<Mutex<SessionState>>;

/// Registry of live sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SharedSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session, creating it on first reference.
    pub async fn get_or_create(&self, session_id: Option<&str>) -> SharedSession {
        let id = session_id.unwrap_or(DEFAULT_SESSION);
        if let Some(session) = self.sessions.read().await.get(id) {
            return Arc::clone(session);
        }

        let mut w = self.sessions.write().await;
        let session = w.entry(id.to_string()).or_insert_with(|| {
            debug!("Creating session {}", id);
            Arc::new(Mutex::new(SessionState::new()))
        });
        Arc::clone(session)
    }

    /// Look up a session without creating it.
    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(session_id).map(Arc::clone)
    }

    /// Reset a session's state in place. Returns false if it does not exist.
    pub async fn reset(&self, session_id: &str) -> bool {
        let Some(session) = self.get(session_id).await else {
            return false;
        };
        session.lock().await.reset();
        info!("Session {} reset", session_id);
        true
    }

    /// Drop a session entirely.
    pub async fn cleanup(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!("Session {} evicted", session_id);
        }
        removed
    }

    /// Ids of all live sessions, sorted.
    pub async fn list_active(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
