//! Per-session turn serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// A table of async mutexes keyed by session id.
///
/// At most one turn per session id holds its guard; distinct ids never
/// contend. Idle entries are pruned on every acquire.
#[derive(Default)]
pub(crate) struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub(crate) async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Only the table holds an idle entry.
            table.retain(|id, lock| id == session_id || Arc::strong_count(lock) > 1);
            Arc::clone(table.entry(session_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
