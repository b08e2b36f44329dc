//! Scripted ChatModel for tests, demos, and offline runs.
//!
//! Each call to `generate` pops the next scripted reply. Every request is
//! recorded so callers can assert on exactly what the model was shown.

use async_trait::async_trait;
use colloquy_core::context::TurnContext;
use colloquy_core::error::ModelError;
use colloquy_core::message::{Message, ToolCallRequest};
use colloquy_core::model::{ChatModel, ChatRequest};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One canned model reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// A final text answer
    Text(String),
    /// A tool-call request, optionally with accompanying text
    ToolCalls {
        content: String,
        calls: Vec<ToolCallRequest>,
    },
    /// A model failure
    Error(ModelError),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// A single tool call with no accompanying text.
    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self::ToolCalls {
            content: String::new(),
            calls: vec![ToolCallRequest::new(id, name, arguments.to_string())],
        }
    }
}

/// A ChatModel that replays a fixed script.
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
    supported_models: Option<Vec<String>>,
}

impl ScriptedChatModel {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            supported_models: None,
        }
    }

    /// A model that answers once with `text`.
    pub fn single_text(text: &str) -> Self {
        Self::new([ScriptedReply::text(text)])
    }

    /// Sleep this long before each reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Only these model names pass `validate_model`.
    pub fn with_supported_models(mut self, models: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.supported_models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    /// Queue another reply at the end of the script.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _ctx: &TurnContext,
        request: ChatRequest,
    ) -> Result<Message, ModelError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(ScriptedReply::Text(text)) => Ok(Message::assistant(text)),
            Some(ScriptedReply::ToolCalls { content, calls }) => {
                Ok(Message::assistant_with_tool_calls(content, calls))
            }
            Some(ScriptedReply::Error(err)) => Err(err),
            None => Err(ModelError::InvalidResponse {
                provider: "scripted".into(),
                message: "script exhausted".into(),
            }),
        }
    }

    async fn validate_model(&self, model: &str) -> Result<(), ModelError> {
        match &self.supported_models {
            Some(models) if !models.iter().any(|m| m == model) => {
                Err(ModelError::UnsupportedModel {
                    provider: "scripted".into(),
                    model: model.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}
