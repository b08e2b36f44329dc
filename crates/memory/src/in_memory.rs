//! In-memory session store, the reference `SessionStore`.

use async_trait::async_trait;
use chrono::Utc;
use colloquy_core::error::StoreError;
use colloquy_core::session::{Session, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// A map from session id to session, behind one store-wide lock.
///
/// The lock is held only while a slot is read or written; the session's own
/// lock guards its contents.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Remove sessions not updated within `ttl`. Returns how many were removed.
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        // A TTL reaching past the representable date range expires nothing.
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.updated_at() >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Swept expired sessions");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<Arc<Session>, StoreError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_or_create(&self, id: &str) -> Result<Arc<Session>, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %id, "Creating session");
                Arc::new(Session::new(id))
            })
            .clone();
        Ok(session)
    }

    async fn put(&self, session: Arc<Session>) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .await
            .insert(session.id().to_string(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.lock().await.remove(id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
