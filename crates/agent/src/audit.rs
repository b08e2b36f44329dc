//! Turn audit trail.
//!
//! The orchestrator reports what happened during each turn (routing, LLM
//! calls, tool calls, outcome) to an optional [`AuditSink`]. Sinks observe;
//! they never influence the turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// How a turn produced its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPath {
    /// A rule replied verbatim
    Direct,
    /// A rule added instructions before the LLM call
    Augmented,
    /// No rule matched
    Chat,
    /// The LLM failed and the rule's fallback was used
    Fallback,
}

impl std::fmt::Display for TurnPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnPath::Direct => "direct",
            TurnPath::Augmented => "augmented",
            TurnPath::Chat => "chat",
            TurnPath::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// One audited event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEntry {
    TurnStarted {
        session_id: String,
        utterance: String,
        timestamp: DateTime<Utc>,
    },

    RuleMatched {
        session_id: String,
        rule: String,
        timestamp: DateTime<Utc>,
    },

    /// A condition failed and its rule was skipped
    ConditionFailed {
        session_id: String,
        rule: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    LlmCall {
        session_id: String,
        round: usize,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ToolCall {
        session_id: String,
        tool: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    TurnCommitted {
        session_id: String,
        path: TurnPath,
        messages_appended: usize,
        timestamp: DateTime<Utc>,
    },

    TurnFailed {
        session_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl AuditEntry {
    pub fn session_id(&self) -> &str {
        match self {
            AuditEntry::TurnStarted { session_id, .. }
            | AuditEntry::RuleMatched { session_id, .. }
            | AuditEntry::ConditionFailed { session_id, .. }
            | AuditEntry::LlmCall { session_id, .. }
            | AuditEntry::ToolCall { session_id, .. }
            | AuditEntry::TurnCommitted { session_id, .. }
            | AuditEntry::TurnFailed { session_id, .. } => session_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditEntry::TurnStarted { timestamp, .. }
            | AuditEntry::RuleMatched { timestamp, .. }
            | AuditEntry::ConditionFailed { timestamp, .. }
            | AuditEntry::LlmCall { timestamp, .. }
            | AuditEntry::ToolCall { timestamp, .. }
            | AuditEntry::TurnCommitted { timestamp, .. }
            | AuditEntry::TurnFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Receives audit entries from the orchestrator.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Writes every entry to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        match &entry {
            AuditEntry::TurnStarted { session_id, .. } => {
                debug!(session_id = %session_id, "audit: turn started");
            }
            AuditEntry::RuleMatched { session_id, rule, .. } => {
                debug!(session_id = %session_id, rule = %rule, "audit: rule matched");
            }
            AuditEntry::ConditionFailed {
                session_id,
                rule,
                error,
                ..
            } => {
                debug!(session_id = %session_id, rule = %rule, error = %error, "audit: condition failed");
            }
            AuditEntry::LlmCall {
                session_id,
                round,
                success,
                duration_ms,
                ..
            } => {
                debug!(session_id = %session_id, round, success, duration_ms, "audit: llm call");
            }
            AuditEntry::ToolCall {
                session_id,
                tool,
                success,
                duration_ms,
                ..
            } => {
                debug!(session_id = %session_id, tool = %tool, success, duration_ms, "audit: tool call");
            }
            AuditEntry::TurnCommitted {
                session_id,
                path,
                messages_appended,
                ..
            } => {
                info!(session_id = %session_id, path = %path, messages_appended, "audit: turn committed");
            }
            AuditEntry::TurnFailed { session_id, error, .. } => {
                warn!(session_id = %session_id, error = %error, "audit: turn failed");
            }
        }
    }
}

/// Keeps every entry in memory. Useful in tests and for inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries for one session, in recording order.
    pub fn for_session(&self, session_id: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.session_id() == session_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

/// Fans entries out to any number of subscribers.
///
/// Uses `tokio::sync::broadcast`; slow subscribers lag and lose entries.
pub struct BroadcastAuditSink {
    sender: broadcast::Sender<Arc<AuditEntry>>,
}

impl BroadcastAuditSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AuditEntry>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastAuditSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl AuditSink for BroadcastAuditSink {
    fn record(&self, entry: AuditEntry) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(entry));
    }
}
