//! OpenAI-compatible ChatModel adapter.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Groq, and any
//! endpoint exposing `/v1/chat/completions` with function calling.

use async_trait::async_trait;
use colloquy_core::context::TurnContext;
use colloquy_core::error::ModelError;
use colloquy_core::message::{Message, Role, ToolCallRequest};
use colloquy_core::model::{ChatModel, ChatRequest, ModelSettings};
use colloquy_core::tool::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-call deadline, layered under the turn deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An OpenAI-compatible chat completion adapter.
pub struct OpenAiCompatModel {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    timeout: Duration,
    known_models: Vec<String>,
}

impl OpenAiCompatModel {
    /// Create a new adapter for an OpenAI-compatible endpoint.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            known_models: Vec::new(),
        }
    }

    /// OpenAI (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// OpenRouter (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Ollama (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Restrict `validate_model` to this list. Empty accepts any model.
    pub fn with_known_models(mut self, models: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.known_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role().to_string(),
                content: if m.content().is_empty() && m.has_tool_calls() {
                    None
                } else {
                    Some(m.content().to_string())
                },
                tool_calls: if m.has_tool_calls() {
                    Some(
                        m.tool_calls()
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id().to_string(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name().to_string(),
                                    arguments: tc.arguments().to_string(),
                                },
                            })
                            .collect(),
                    )
                } else {
                    None
                },
                tool_call_id: m.tool_call_id().map(str::to_string),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": false,
        });
        apply_settings(&mut body, &request.settings);
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    /// Turn a decoded completion into an assistant message.
    fn into_message(&self, api_response: ApiResponse) -> Result<Message, ModelError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.invalid("No choices in response"))?;

        if choice.message.role != Role::Assistant.to_string() {
            return Err(self.invalid(format!(
                "Expected an assistant message, got role '{}'",
                choice.message.role
            )));
        }

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();
        let content = choice.message.content.unwrap_or_default();

        if content.is_empty() && tool_calls.is_empty() {
            return Err(self.invalid("Empty completion: no content and no tool calls"));
        }

        Ok(Message::assistant_with_tool_calls(content, tool_calls))
    }

    fn invalid(&self, message: impl Into<String>) -> ModelError {
        ModelError::InvalidResponse {
            provider: self.name.clone(),
            message: message.into(),
        }
    }

    fn transport_error(&self, err: reqwest::Error, timeout: Duration) -> ModelError {
        if err.is_timeout() {
            ModelError::Timeout {
                provider: self.name.clone(),
                timeout_secs: timeout.as_secs(),
            }
        } else {
            ModelError::Network {
                provider: self.name.clone(),
                message: err.to_string(),
            }
        }
    }
}

fn apply_settings(body: &mut serde_json::Value, settings: &ModelSettings) {
    if let Some(temperature) = settings.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    if let Some(max_tokens) = settings.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(top_p) = settings.top_p {
        body["top_p"] = serde_json::json!(top_p);
    }
    if let Some(penalty) = settings.frequency_penalty {
        body["frequency_penalty"] = serde_json::json!(penalty);
    }
    if let Some(penalty) = settings.presence_penalty {
        body["presence_penalty"] = serde_json::json!(penalty);
    }
    if !settings.stop.is_empty() {
        body["stop"] = serde_json::json!(settings.stop);
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        ctx: &TurnContext,
        request: ChatRequest,
    ) -> Result<Message, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let timeout = ctx
            .remaining()
            .map_or(self.timeout, |left| left.min(self.timeout));
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ModelError::RateLimited {
                provider: self.name.clone(),
                retry_after_secs,
            });
        }

        if status == 401 || status == 403 {
            return Err(ModelError::Authentication {
                provider: self.name.clone(),
                message: "Invalid API key or insufficient permissions".into(),
            });
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ModelError::Api {
                provider: self.name.clone(),
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| self.invalid(format!("Failed to parse response: {e}")))?;

        self.into_message(api_response)
    }

    async fn validate_model(&self, model: &str) -> Result<(), ModelError> {
        if model.trim().is_empty() {
            return Err(ModelError::UnsupportedModel {
                provider: self.name.clone(),
                model: model.to_string(),
            });
        }
        if self.known_models.is_empty() || self.known_models.iter().any(|m| m == model) {
            Ok(())
        } else {
            Err(ModelError::UnsupportedModel {
                provider: self.name.clone(),
                model: model.to_string(),
            })
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}
