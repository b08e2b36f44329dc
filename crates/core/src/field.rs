//! Structured-input field specifications.

use crate::message::Message;
use serde::{Deserialize, Serialize};

/// A piece of information the agent should collect from the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Stable identifier, also the keyword looked for in the conversation.
    pub name: String,
    /// What to ask the user.
    pub prompt: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            required: false,
        }
    }
}

/// Whether `name` appears (case-insensitively) in any message content.
///
/// This is a keyword heuristic: it detects that a field was *talked about*,
/// not that a value was supplied.
pub fn is_mentioned(name: &str, messages: &[Message]) -> bool {
    let needle = name.to_lowercase();
    messages
        .iter()
        .any(|m| m.content().to_lowercase().contains(&needle))
}

/// The subset of `fields` not yet mentioned in `messages`, in declaration order.
pub fn missing_fields<'a>(fields: &'a [FieldSpec], messages: &[Message]) -> Vec<&'a FieldSpec> {
    fields
        .iter()
        .filter(|f| !is_mentioned(&f.name, messages))
        .collect()
}
