//! # Colloquy Providers
//!
//! ChatModel implementations.
//!
//! - [`openai_compat`]: any endpoint speaking the OpenAI chat-completions format
//! - [`scripted`]: canned replies for tests, demos, and offline runs

pub mod openai_compat;
pub mod scripted;

pub use openai_compat::OpenAiCompatModel;
pub use scripted::{ScriptedChatModel, ScriptedReply};
