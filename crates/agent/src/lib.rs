//! The conversational agent: rules, prompt assembly, and the turn loop.
//!
//! Each turn:
//!
//! 1. **Record** the user message in the session
//! 2. **Route** through the agent's rules (first match wins)
//! 3. **Reply** verbatim, or **call the LLM** with any rule instructions
//! 4. **Resolve tools** the LLM asks for and call it again, up to a bound
//! 5. **Commit** the final reply and persist the session
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use colloquy_agent::{AgentBuilder, ChatOptions};
//! # use colloquy_core::{condition, TurnContext};
//! # async fn demo(model: Arc<dyn colloquy_core::ChatModel>) -> colloquy_core::Result<()> {
//! let agent = AgentBuilder::new("support")
//!     .with_model("gpt-4o-mini")
//!     .with_chat_model(model)
//!     .when(condition::contains("refund"))
//!     .ask("Refunds are processed within 5 business days.")
//!     .build()
//!     .build()
//!     .await?;
//!
//! let reply = agent
//!     .chat(&TurnContext::new(), "user-1", "I want a refund", ChatOptions::default())
//!     .await?;
//! println!("{}", reply.text());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod audit;
pub mod builder;
mod locks;
mod prompt;
mod turn;

pub use agent::{Agent, AgentBuilder, ChatOptions, DEFAULT_MAX_TOOL_ROUNDS, TurnResult};
pub use audit::{AuditEntry, AuditSink, BroadcastAuditSink, MemoryAuditSink, TracingAuditSink, TurnPath};
pub use builder::{AugmentedRule, DirectRule, RuleStage};
