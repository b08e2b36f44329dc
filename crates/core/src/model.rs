//! ChatModel trait: the abstraction over LLM completion services.
//!
//! A ChatModel receives the abstract message list (roles, content, tool-call
//! metadata) plus the tools on offer and returns one assistant message. Wire
//! formats, retries, and per-call deadlines are the adapter's business.
//!
//! Implementations: OpenAI-compatible HTTP, scripted (tests and demos).

use crate::context::TurnContext;
use crate::error::{ModelError, SettingsError};
use crate::message::Message;
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Optional sampling overrides. `None` means "model default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Sampling temperature, within [0, 2]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling, within [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Within [-2, 2]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Within [-2, 2]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ModelSettings {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    /// Reject out-of-range values. Runs before any LLM call.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;
        if self.max_tokens == Some(0) {
            return Err(SettingsError::ZeroMaxTokens);
        }
        Ok(())
    }

    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(&self, overrides: &ModelSettings) -> ModelSettings {
        ModelSettings {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            top_p: overrides.top_p.or(self.top_p),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            stop: if overrides.stop.is_empty() {
                self.stop.clone()
            } else {
                overrides.stop.clone()
            },
        }
    }
}

fn check_range(field: &'static str, value: Option<f32>, min: f32, max: f32) -> Result<(), SettingsError> {
    match value {
        Some(v) if v.is_nan() || v < min || v > max => Err(SettingsError::OutOfRange {
            field,
            value: v,
            min,
            max,
        }),
        _ => Ok(()),
    }
}

/// Everything a ChatModel needs for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The prompt, in order
    pub messages: Vec<Message>,

    #[serde(default)]
    pub settings: ModelSettings,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Informational metadata about a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub supports_tools: bool,
}

/// The core ChatModel trait.
///
/// The orchestrator calls `generate()` without knowing which backend is in
/// use. A returned message must be assistant-role and carry non-empty
/// content, at least one tool call, or both.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// A human-readable adapter name (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Produce the next assistant message.
    async fn generate(
        &self,
        ctx: &TurnContext,
        request: ChatRequest,
    ) -> std::result::Result<Message, ModelError>;

    /// Check that `model` can be served. Accepts everything by default.
    async fn validate_model(&self, _model: &str) -> std::result::Result<(), ModelError> {
        Ok(())
    }

    /// Metadata about `model`.
    fn model_info(&self, model: &str) -> ModelInfo {
        ModelInfo {
            name: model.to_string(),
            provider: self.name().to_string(),
            context_window: None,
            supports_tools: true,
        }
    }
}
