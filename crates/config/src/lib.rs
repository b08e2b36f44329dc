//! Configuration loading and validation for Colloquy.
//!
//! Loads configuration from `~/.colloquy/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use colloquy_core::model::ModelSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.colloquy/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the chat endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Adapter name, reported in logs and error prefixes
    #[serde(default = "default_provider")]
    pub provider: String,

    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model requested on every turn
    #[serde(default = "default_model")]
    pub model: String,

    /// Default sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Default max tokens per completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-call deadline for the chat endpoint
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// When non-empty, the model must be one of these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_models: Vec<String>,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_request_timeout_secs() -> u64 {
    30
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("known_models", &self.known_models)
            .field("agent", &self.agent)
            .field("session", &self.session)
            .finish()
    }
}

/// Agent identity and orchestration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// System instructions prepended to every prompt
    #[serde(default)]
    pub instructions: String,

    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Emit per-stage debug logs for each turn
    #[serde(default)]
    pub debug_logging: bool,
}

fn default_agent_name() -> String {
    "assistant".into()
}
fn default_max_tool_rounds() -> usize {
    4
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            description: String::new(),
            instructions: String::new(),
            max_tool_rounds: default_max_tool_rounds(),
            debug_logging: false,
        }
    }
}

/// Which session store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_backend")]
    pub backend: SessionBackend,

    /// Directory for the file backend (default: `~/.colloquy/sessions`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Idle sessions older than this are swept by the memory backend. 0 disables.
    #[serde(default)]
    pub ttl_secs: u64,
}

/// Upper bound for `session.ttl_secs`: ten years.
pub const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn default_session_backend() -> SessionBackend {
    SessionBackend::Memory
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            directory: None,
            ttl_secs: 0,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.colloquy/config.toml).
    ///
    /// Environment overrides:
    /// - `COLLOQUY_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `COLLOQUY_MODEL`
    /// - `COLLOQUY_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("COLLOQUY_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = var("COLLOQUY_MODEL") {
            self.model = model;
        }
        if let Some(base_url) = var("COLLOQUY_BASE_URL") {
            self.base_url = base_url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".colloquy")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model_settings()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_rounds must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.session.ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(ConfigError::ValidationError(format!(
                "session.ttl_secs must be at most {MAX_SESSION_TTL_SECS}"
            )));
        }
        Ok(())
    }

    /// Default model settings derived from the top-level fields.
    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..ModelSettings::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: None,
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
            known_models: vec![],
            agent: AgentConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
