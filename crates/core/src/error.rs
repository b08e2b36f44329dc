//! Error types for the Colloquy domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is what a turn
//! surfaces to callers.

use thiserror::Error;

/// The top-level error type for all Colloquy operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Construction ---
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid model settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    // --- Turn execution ---
    #[error("LLM error: {0}")]
    Llm(#[from] ModelError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Condition error: {0}")]
    Condition(#[from] ConditionError),

    #[error("Turn cancelled: {0}")]
    Cancelled(String),

    // --- Sessions ---
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session store error: {0}")]
    Store(StoreError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The named error kinds callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfig,
    UnsupportedModel,
    LlmError,
    ToolError,
    ConditionError,
    Cancelled,
    SessionNotFound,
    Store,
    Serialization,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) | Error::Settings(_) => ErrorKind::InvalidConfig,
            Error::UnsupportedModel(_) => ErrorKind::UnsupportedModel,
            Error::Llm(ModelError::UnsupportedModel { .. }) => ErrorKind::UnsupportedModel,
            Error::Llm(_) => ErrorKind::LlmError,
            Error::Tool(_) => ErrorKind::ToolError,
            Error::Condition(_) => ErrorKind::ConditionError,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Error::Store(_) => ErrorKind::Store,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Error::SessionNotFound(id),
            other => Error::Store(other),
        }
    }
}

// --- Bounded context errors ---

/// Failures reported by a `ChatModel` adapter.
///
/// Every variant carries the adapter name so the rendered message is
/// prefixed with the transport that produced it.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("{provider}: API request failed (status {status_code}): {message}")]
    Api {
        provider: String,
        status_code: u16,
        message: String,
    },

    #[error("{provider}: rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    #[error("{provider}: authentication failed: {message}")]
    Authentication { provider: String, message: String },

    #[error("{provider}: request timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("{provider}: network error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider}: invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("{provider}: model not supported: {model}")]
    UnsupportedModel { provider: String, model: String },
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool {0}")]
    NotFound(String),

    #[error("invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("{tool_name} failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("{tool_name} panicked: {reason}")]
    Panicked { tool_name: String, reason: String },

    #[error("{tool_name} timed out after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("tool rounds exhausted after {rounds} rounds (last model text: {last_text:?})")]
    RoundsExhausted { rounds: usize, last_text: String },
}

#[derive(Debug, Clone, Error)]
pub enum ConditionError {
    #[error("{condition}: per-turn data is missing key '{key}'")]
    MissingData { condition: String, key: String },

    #[error("{condition}: expected a string under '{key}'")]
    NotAString { condition: String, key: String },

    #[error("{condition}: {reason}")]
    Failed { condition: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} does not exist")]
    NotFound(String),

    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("session {id} is corrupted: {reason}")]
    Corrupted { id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("max_tokens must be greater than zero")]
    ZeroMaxTokens,
}
