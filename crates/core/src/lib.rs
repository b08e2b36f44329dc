//! # Colloquy Core
//!
//! Domain types, traits, and error definitions for the Colloquy
//! conversational agent engine. This crate knows nothing about any LLM wire
//! protocol or storage backend: it defines the model that the orchestrator
//! and every adapter are written against.
//!
//! ## Layout
//!
//! - [`message`] and [`session`]: conversation records and per-conversation state
//! - [`condition`], [`rule`], [`field`]: pre-LLM flow control
//! - [`tool`]: callable tools and the registry the orchestrator dispatches through
//! - [`model`]: the `ChatModel` boundary and per-turn model settings
//! - [`context`]: cancellation and deadlines for a single turn

pub mod condition;
pub mod context;
pub mod error;
pub mod field;
pub mod message;
pub mod model;
pub mod rule;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use condition::{Condition, ConditionRef, TurnData};
pub use context::TurnContext;
pub use error::{ConditionError, Error, ErrorKind, ModelError, Result, SettingsError, StoreError, ToolError};
pub use field::FieldSpec;
pub use message::{Message, Role, ToolCallRequest};
pub use model::{ChatModel, ChatRequest, ModelInfo, ModelSettings};
pub use rule::{Rule, RuleAction};
pub use session::{Session, SessionRecord, SessionStore};
pub use tool::{FnTool, ParamSchema, Tool, ToolDefinition, ToolRegistry};
