//! Tool trait and registry.
//!
//! Tools are the functions an LLM may ask the orchestrator to call. The
//! registry owns lookup, argument decoding, and failure capture, so a broken
//! tool always comes back as a [`ToolError`] rather than taking the turn down.

use crate::context::{TurnContext, duration_ms};
use crate::error::ToolError;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with decoded JSON arguments.
    async fn invoke(&self, ctx: &TurnContext, arguments: Value) -> Result<Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type ToolFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync;

/// A tool backed by an async closure.
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    f: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            f: Arc::new(move |args| f(args).boxed()),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn invoke(&self, _ctx: &TurnContext, arguments: Value) -> Result<Value, ToolError> {
        (self.f)(arguments).await
    }
}

/// Builder for the `{"type": "object", ...}` parameter schema.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, ty: &str, description: &str) -> Self {
        self.required.push(name.to_string());
        self.optional(name, ty, description)
    }

    pub fn optional(mut self, name: &str, ty: &str, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({ "type": ty, "description": description }),
        );
        self
    }

    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// A registry of available tools.
///
/// Definitions are reported in registration order. Cloning is cheap: tools
/// are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every invocation by `timeout`, under the turn deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// A copy of this registry with `extra` layered on top.
    pub fn layered(&self, extra: &[Arc<dyn Tool>]) -> ToolRegistry {
        let mut registry = self.clone();
        for tool in extra {
            registry.register_arc(Arc::clone(tool));
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.to_definition())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve and run one call with raw JSON arguments.
    ///
    /// Unknown names, undecodable arguments, failures, panics, and timeouts
    /// all come back as `Err(ToolError)`.
    pub async fn execute(
        &self,
        ctx: &TurnContext,
        name: &str,
        raw_arguments: &str,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let arguments = decode_arguments(name, raw_arguments)?;
        debug!(tool = %name, "Invoking tool");

        let call = AssertUnwindSafe(tool.invoke(ctx, arguments)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| ToolError::Timeout {
                tool_name: name.to_string(),
                timeout_ms: duration_ms(limit),
            })?,
            None => call.await,
        };

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(tool = %name, reason = %reason, "Tool panicked");
                Err(ToolError::Panicked {
                    tool_name: name.to_string(),
                    reason,
                })
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn decode_arguments(name: &str, raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
        tool_name: name.to_string(),
        reason: e.to_string(),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
