//! Session state and the `SessionStore` boundary.
//!
//! A [`Session`] is shared as `Arc<Session>` between the store and the
//! orchestrator. Its mutable parts live behind an internal `RwLock`; every
//! read hands back an owned copy so callers never observe a half-applied
//! append.

use crate::error::StoreError;
use crate::message::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Durable per-conversation state keyed by a caller-chosen id.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

#[derive(Debug, Clone)]
struct SessionState {
    messages: Vec<Message>,
    data: Map<String, Value>,
    updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            state: RwLock::new(SessionState {
                messages: Vec::new(),
                data: Map::new(),
                updated_at: now,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.read().updated_at
    }

    /// Snapshot of the message log.
    pub fn messages(&self) -> Vec<Message> {
        self.read().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.read().messages.len()
    }

    pub fn last_message(&self) -> Option<Message> {
        self.read().messages.last().cloned()
    }

    /// Append a message. `updated_at` never falls behind a message timestamp.
    pub fn push(&self, message: Message) {
        let mut state = self.write();
        state.updated_at = Utc::now().max(message.timestamp()).max(state.updated_at);
        state.messages.push(message);
    }

    /// Append several messages under one lock acquisition.
    pub fn extend(&self, messages: impl IntoIterator<Item = Message>) {
        let mut state = self.write();
        for message in messages {
            state.updated_at = Utc::now().max(message.timestamp()).max(state.updated_at);
            state.messages.push(message);
        }
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.read().data.get(key).cloned()
    }

    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        let mut state = self.write();
        state.data.insert(key.into(), value);
        state.updated_at = Utc::now().max(state.updated_at);
    }

    pub fn remove_data(&self, key: &str) -> Option<Value> {
        let mut state = self.write();
        let removed = state.data.remove(key);
        if removed.is_some() {
            state.updated_at = Utc::now().max(state.updated_at);
        }
        removed
    }

    /// Snapshot of the scratch map.
    pub fn data(&self) -> Map<String, Value> {
        self.read().data.clone()
    }

    /// Copy this session into its persisted form.
    pub fn to_record(&self) -> SessionRecord {
        let state = self.read();
        SessionRecord {
            id: self.id.clone(),
            created_at: self.created_at,
            updated_at: state.updated_at,
            messages: state.messages.clone(),
            data: state.data.clone(),
        }
    }

    /// Rebuild a session from its persisted form.
    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            state: RwLock::new(SessionState {
                messages: record.messages,
                data: record.data,
                updated_at: record.updated_at,
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_record())
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<SessionRecord>(json).map(Self::from_record)
    }

    // A panic while holding the lock cannot leave the log half-written:
    // every mutation is a single push/insert, so the poisoned value is usable.
    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The persisted JSON layout of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Where sessions live between turns.
///
/// Implementations: in-memory (reference), JSON files. Operations on one
/// session id must be linearizable; distinct ids need not coordinate.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Fetch an existing session, or `StoreError::NotFound`.
    async fn get(&self, id: &str) -> Result<Arc<Session>, StoreError>;

    /// Fetch a session, creating an empty one when absent.
    async fn get_or_create(&self, id: &str) -> Result<Arc<Session>, StoreError>;

    /// Insert or replace a session.
    async fn put(&self, session: Arc<Session>) -> Result<(), StoreError>;

    /// Delete a session. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Ids of all stored sessions.
    async fn list_ids(&self) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Role, ToolCallRequest};

    #[test]
    fn session_tracks_updates() {
        let session = Session::new("s1");
        let created = session.created_at();

        session.push(Message::user("First message"));
        assert_eq!(session.message_count(), 1);
        assert!(session.updated_at() >= created);
    }

    #[test]
    fn updated_at_not_behind_any_message() {
        let session = Session::new("s1");
        session.push(Message::user("a"));
        session.push(Message::assistant("b"));
        let updated = session.updated_at();
        assert!(session.messages().iter().all(|m| m.timestamp() <= updated));
    }

    #[test]
    fn messages_returns_a_copy() {
        let session = Session::new("s1");
        session.push(Message::user("hello"));
        let mut snapshot = session.messages();
        snapshot.push(Message::assistant("not in the session"));
        assert_eq!(session.message_count(), 1);
    }

    #[test]
    fn scratch_data_set_get_remove() {
        let session = Session::new("s1");
        session.set_data("plan", serde_json::json!({"tier": "gold"}));
        assert_eq!(session.get_data("plan").unwrap()["tier"], "gold");
        assert!(session.remove_data("plan").is_some());
        assert!(session.get_data("plan").is_none());
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let session = Session::new("roundtrip");
        session.push(Message::user("add 2 and 3"));
        session.push(Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new("call_1", "add", r#"{"a":2,"b":3}"#)],
        ));
        session.push(Message::tool_result("call_1", "add", "5"));
        session.push(Message::assistant("5"));
        session.set_data("count", serde_json::json!(3));

        let json = session.to_json().unwrap();
        let restored = Session::from_json(&json).unwrap();

        assert_eq!(restored.id(), "roundtrip");
        assert_eq!(restored.created_at().timestamp(), session.created_at().timestamp());
        assert_eq!(restored.updated_at().timestamp(), session.updated_at().timestamp());
        assert_eq!(restored.messages(), session.messages());
        assert_eq!(restored.data(), session.data());
        assert_eq!(restored.messages()[2].role(), Role::Tool);
    }

    #[test]
    fn concurrent_pushes_are_serialized() {
        let session = Arc::new(Session::new("busy"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = Arc::clone(&session);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        s.push(Message::user(format!("{i}-{j}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(session.message_count(), 400);
    }
}
