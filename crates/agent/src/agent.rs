//! The Agent value and its builder.

use crate::audit::AuditSink;
use crate::builder::RuleStage;
use crate::locks::SessionLocks;
use colloquy_core::condition::{ConditionRef, TurnData};
use colloquy_core::error::{Error, ModelError, Result};
use colloquy_core::field::FieldSpec;
use colloquy_core::message::Message;
use colloquy_core::model::{ChatModel, ModelInfo, ModelSettings};
use colloquy_core::rule::{Rule, RuleAction};
use colloquy_core::session::{Session, SessionStore};
use colloquy_core::tool::{Tool, ToolRegistry};
use colloquy_memory::InMemorySessionStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default bound on tool-execution rounds per turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 4;

/// A configured conversational agent.
///
/// Immutable after [`AgentBuilder::build`]; share it behind an `Arc` to run
/// turns from many tasks.
pub struct Agent {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) instructions: String,
    pub(crate) model: String,
    pub(crate) model_settings: ModelSettings,
    pub(crate) chat_model: Arc<dyn ChatModel>,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) tools: ToolRegistry,
    pub(crate) rules: Vec<Rule>,
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) debug_logging: bool,
    pub(crate) max_tool_rounds: usize,
    pub(crate) audit: Option<Arc<dyn AuditSink>>,
    pub(crate) locks: SessionLocks,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn model_settings(&self) -> &ModelSettings {
        &self.model_settings
    }

    /// Informational metadata reported by the ChatModel.
    pub fn model_info(&self) -> ModelInfo {
        self.chat_model.model_info(&self.model)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn max_tool_rounds(&self) -> usize {
        self.max_tool_rounds
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Look up an existing session.
    pub async fn session(&self, session_id: &str) -> Result<Arc<Session>> {
        Ok(self.store.get(session_id).await?)
    }

    /// Delete a session. Returns whether it existed.
    pub async fn reset_session(&self, session_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(session_id).await;
        Ok(self.store.delete(session_id).await?)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("chat_model", &self.chat_model.name())
            .field("store", &self.store.name())
            .field("tools", &self.tools)
            .field("rules", &self.rules.len())
            .field("fields", &self.fields.len())
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish()
    }
}

/// Per-turn options.
#[derive(Clone, Default)]
pub struct ChatOptions {
    /// Run the turn against this session instead of the one passed to `chat`
    pub session_id: Option<String>,

    /// Tools available for this turn only; they shadow same-named agent tools
    pub extra_tools: Vec<Arc<dyn Tool>>,

    /// Layered over the agent's model settings
    pub model_settings: Option<ModelSettings>,

    /// Extra per-turn data visible to conditions
    pub data: TurnData,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.extra_tools.push(Arc::new(tool));
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = Some(settings);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// The outcome of one successful turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// The final assistant message
    pub message: Message,

    /// Reserved; always `None`
    pub structured_output: Option<Value>,

    /// The session after the turn
    pub session: Arc<Session>,
}

impl TurnResult {
    pub fn text(&self) -> &str {
        self.message.content()
    }
}

/// Fluent builder for [`Agent`].
pub struct AgentBuilder {
    name: String,
    description: String,
    instructions: String,
    model: Option<String>,
    model_settings: ModelSettings,
    chat_model: Option<Arc<dyn ChatModel>>,
    store: Option<Arc<dyn SessionStore>>,
    tools: ToolRegistry,
    rules: Vec<Rule>,
    fields: Vec<FieldSpec>,
    debug_logging: bool,
    max_tool_rounds: usize,
    audit: Option<Arc<dyn AuditSink>>,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instructions: String::new(),
            model: None,
            model_settings: ModelSettings::default(),
            chat_model: None,
            store: None,
            tools: ToolRegistry::new(),
            rules: Vec::new(),
            fields: Vec::new(),
            debug_logging: false,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            audit: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// System instructions placed at the head of every prompt.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn with_chat_model(mut self, chat_model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(chat_model);
        self
    }

    /// Defaults to an [`InMemorySessionStore`].
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register_arc(tool);
        self
    }

    /// Bound every tool invocation, under the turn deadline.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tools = self.tools.with_timeout(timeout);
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Start a rule. Rules are matched in declaration order.
    pub fn when(self, condition: ConditionRef) -> RuleStage {
        RuleStage::new(self, condition)
    }

    /// Append an already-built rule.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Validate the configuration and run the model pre-flight check.
    pub async fn build(self) -> Result<Agent> {
        let chat_model = self
            .chat_model
            .ok_or_else(|| Error::InvalidConfig("no chat model configured".into()))?;

        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig("no model name configured".into()))?;

        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("agent name must not be empty".into()));
        }
        if self.max_tool_rounds == 0 {
            return Err(Error::InvalidConfig(
                "max_tool_rounds must be at least 1".into(),
            ));
        }
        self.model_settings.validate()?;
        check_collect_fields(&self.rules, &self.fields)?;

        chat_model
            .validate_model(&model)
            .await
            .map_err(|e| match e {
                ModelError::UnsupportedModel { .. } => Error::UnsupportedModel(e.to_string()),
                other => Error::Llm(other),
            })?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));

        info!(
            agent = %self.name,
            model = %model,
            chat_model = %chat_model.name(),
            store = %store.name(),
            tools = self.tools.len(),
            rules = self.rules.len(),
            "Agent ready"
        );

        Ok(Agent {
            name: self.name,
            description: self.description,
            instructions: self.instructions,
            model,
            model_settings: self.model_settings,
            chat_model,
            store,
            tools: self.tools,
            rules: self.rules,
            fields: self.fields,
            debug_logging: self.debug_logging,
            max_tool_rounds: self.max_tool_rounds,
            audit: self.audit,
            locks: SessionLocks::default(),
        })
    }
}

/// Every field a `Collect` rule names must be declared on the agent.
fn check_collect_fields(rules: &[Rule], fields: &[FieldSpec]) -> Result<()> {
    for rule in rules {
        if let RuleAction::Collect(names) = rule.action() {
            if names.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "rule {} collects no fields",
                    rule.name()
                )));
            }
            if let Some(unknown) = names.iter().find(|n| !fields.iter().any(|f| &f.name == *n)) {
                return Err(Error::InvalidConfig(format!(
                    "rule {} collects undeclared field '{unknown}'",
                    rule.name()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::condition;
    use colloquy_core::error::ErrorKind;
    use colloquy_providers::ScriptedChatModel;

    fn scripted() -> Arc<dyn ChatModel> {
        Arc::new(ScriptedChatModel::single_text("hi"))
    }

    #[tokio::test]
    async fn build_requires_chat_model_and_model_name() {
        let err = AgentBuilder::new("a").with_model("m").build().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let err = AgentBuilder::new("a")
            .with_chat_model(scripted())
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn build_rejects_zero_rounds_and_bad_settings() {
        let err = AgentBuilder::new("a")
            .with_model("m")
            .with_chat_model(scripted())
            .with_max_tool_rounds(0)
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let err = AgentBuilder::new("a")
            .with_model("m")
            .with_chat_model(scripted())
            .with_model_settings(ModelSettings::default().with_temperature(3.0))
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn unsupported_model_fails_preflight() {
        let model = Arc::new(ScriptedChatModel::single_text("hi").with_supported_models(["good"]));
        let err = AgentBuilder::new("a")
            .with_model("bad")
            .with_chat_model(model)
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedModel);
    }

    #[tokio::test]
    async fn collect_of_undeclared_field_is_rejected() {
        let err = AgentBuilder::new("a")
            .with_model("m")
            .with_chat_model(scripted())
            .with_field(FieldSpec::required("name", "Your name?"))
            .when(condition::always())
            .collect(["name", "email"])
            .build()
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("email"));
    }

    #[tokio::test]
    async fn defaults_are_applied() {
        let agent = AgentBuilder::new("helper")
            .with_model("m")
            .with_chat_model(scripted())
            .build()
            .await
            .unwrap();
        assert_eq!(agent.max_tool_rounds(), DEFAULT_MAX_TOOL_ROUNDS);
        assert_eq!(agent.session_store().name(), "memory");
        assert_eq!(agent.model_info().provider, "scripted");
        assert!(!agent.debug_logging());
    }

    #[tokio::test]
    async fn missing_session_is_reported() {
        let agent = AgentBuilder::new("helper")
            .with_model("m")
            .with_chat_model(scripted())
            .build()
            .await
            .unwrap();
        let err = agent.session("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }
}
