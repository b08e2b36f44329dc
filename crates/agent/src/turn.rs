//! The turn orchestrator.
//!
//! One turn runs through these states:
//!
//! ```text
//! Start -> Routed -> (Direct | Augmented | Chat) -> [ToolLoop]* -> Committed
//!                                                              \-> Failed
//! ```
//!
//! 1. **Acquire** the session (created if absent) under its per-session lock
//! 2. **Record** the user message
//! 3. **Route**: evaluate rules in order, first match wins
//! 4. **Direct** rules reply verbatim; **Augmented** rules add a transient
//!    system message; otherwise plain **Chat**
//! 5. **Call the LLM**; while it requests tools, run them, append the
//!    assistant message and its tool results, and call again (bounded)
//! 6. **Commit** the final assistant message and persist the session

use crate::agent::{Agent, ChatOptions, TurnResult};
use crate::audit::{AuditEntry, TurnPath};
use crate::prompt;
use chrono::Utc;
use colloquy_core::condition::{TurnData, USER_INPUT_KEY};
use colloquy_core::context::{TurnContext, duration_ms};
use colloquy_core::error::{Error, Result, ToolError};
use colloquy_core::field::{self, FieldSpec};
use colloquy_core::message::Message;
use colloquy_core::model::{ChatRequest, ModelSettings};
use colloquy_core::rule::{Rule, RuleAction};
use colloquy_core::session::Session;
use colloquy_core::tool::ToolRegistry;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Start,
    Routed,
    Direct,
    Augmented,
    Chat,
    ToolLoop,
    Committed,
    Failed,
}

impl TurnState {
    fn as_str(self) -> &'static str {
        match self {
            TurnState::Start => "start",
            TurnState::Routed => "routed",
            TurnState::Direct => "direct",
            TurnState::Augmented => "augmented",
            TurnState::Chat => "chat",
            TurnState::ToolLoop => "tool_loop",
            TurnState::Committed => "committed",
            TurnState::Failed => "failed",
        }
    }
}

/// What routing decided.
enum Route<'a> {
    Direct(&'a str),
    Augmented {
        rule: &'a Rule,
        instruction: Option<String>,
    },
    Chat,
}

/// Mutable bookkeeping for one turn.
struct Turn<'a> {
    agent: &'a Agent,
    ctx: &'a TurnContext,
    session: Arc<Session>,
    state: TurnState,
}

impl Turn<'_> {
    fn transition(&mut self, next: TurnState) {
        if self.agent.debug_logging {
            debug!(
                session_id = %self.session.id(),
                from = self.state.as_str(),
                to = next.as_str(),
                "Turn state transition"
            );
        }
        self.state = next;
    }

    fn session_id(&self) -> &str {
        self.session.id()
    }
}

impl Agent {
    /// Run one turn: route, call the LLM (and tools), commit, persist.
    pub async fn chat(
        &self,
        ctx: &TurnContext,
        session_id: &str,
        utterance: &str,
        options: ChatOptions,
    ) -> Result<TurnResult> {
        let ChatOptions {
            session_id: override_id,
            extra_tools,
            model_settings,
            data,
        } = options;
        let session_id = override_id.as_deref().unwrap_or(session_id);

        let settings = match &model_settings {
            Some(overrides) => self.model_settings.merge(overrides),
            None => self.model_settings.clone(),
        };
        settings.validate()?;

        let _guard = self.locks.acquire(session_id).await;
        let session = self.store.get_or_create(session_id).await?;

        info!(
            session_id = %session_id,
            messages = session.message_count(),
            "Processing turn"
        );
        self.audit(|| AuditEntry::TurnStarted {
            session_id: session_id.to_string(),
            utterance: utterance.to_string(),
            timestamp: Utc::now(),
        });

        let mut turn = Turn {
            agent: self,
            ctx,
            session,
            state: TurnState::Start,
        };
        let before = turn.session.message_count();
        turn.session.push(Message::user(utterance));

        let mut turn_data = data;
        turn_data.insert(USER_INPUT_KEY.into(), Value::String(utterance.to_string()));

        let tools = if extra_tools.is_empty() {
            Cow::Borrowed(&self.tools)
        } else {
            Cow::Owned(self.tools.layered(&extra_tools))
        };

        let outcome = match self.run_turn(&mut turn, &turn_data, &settings, &tools).await {
            Ok(done) => self
                .store
                .put(Arc::clone(&turn.session))
                .await
                .map(|()| done)
                .map_err(Error::from),
            Err(err) => {
                if let Err(store_err) = self.store.put(Arc::clone(&turn.session)).await {
                    warn!(
                        session_id = %session_id,
                        error = %store_err,
                        "Failed to persist session after turn failure"
                    );
                }
                Err(err)
            }
        };

        match outcome {
            Ok((message, path)) => {
                turn.transition(TurnState::Committed);
                let appended = turn.session.message_count() - before;
                info!(
                    session_id = %session_id,
                    path = %path,
                    appended,
                    "Turn committed"
                );
                self.audit(|| AuditEntry::TurnCommitted {
                    session_id: session_id.to_string(),
                    path,
                    messages_appended: appended,
                    timestamp: Utc::now(),
                });
                Ok(TurnResult {
                    message,
                    structured_output: None,
                    session: turn.session,
                })
            }
            Err(err) => {
                turn.transition(TurnState::Failed);
                warn!(session_id = %session_id, error = %err, "Turn failed");
                self.audit(|| AuditEntry::TurnFailed {
                    session_id: session_id.to_string(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                Err(err)
            }
        }
    }

    async fn run_turn(
        &self,
        turn: &mut Turn<'_>,
        data: &TurnData,
        settings: &ModelSettings,
        tools: &ToolRegistry,
    ) -> Result<(Message, TurnPath)> {
        let route = self.route(&turn.session, data);
        turn.transition(TurnState::Routed);

        let (transient, fallback, path) = match route {
            Route::Direct(text) => {
                turn.transition(TurnState::Direct);
                let reply = Message::assistant(text);
                turn.session.push(reply.clone());
                return Ok((reply, TurnPath::Direct));
            }
            Route::Augmented {
                rule,
                instruction: Some(instruction),
            } => {
                turn.transition(TurnState::Augmented);
                (vec![Message::system(instruction)], rule.fallback(), TurnPath::Augmented)
            }
            // A collect rule with nothing left to ask runs as plain chat.
            Route::Augmented {
                instruction: None, ..
            }
            | Route::Chat => {
                turn.transition(TurnState::Chat);
                (Vec::new(), None, TurnPath::Chat)
            }
        };

        match self.complete(turn, &transient, settings, tools).await {
            Ok(reply) => Ok((reply, path)),
            Err(Error::Llm(err)) => match fallback {
                Some(text) => {
                    warn!(
                        session_id = %turn.session_id(),
                        error = %err,
                        "LLM call failed, replying with rule fallback"
                    );
                    let reply = Message::assistant(text);
                    turn.session.push(reply.clone());
                    Ok((reply, TurnPath::Fallback))
                }
                None => Err(Error::Llm(err)),
            },
            Err(other) => Err(other),
        }
    }

    /// First matching rule wins. Condition failures count as non-matches.
    fn route<'a>(&'a self, session: &Session, data: &TurnData) -> Route<'a> {
        for rule in &self.rules {
            match rule.condition().evaluate(session, data) {
                Ok(true) => {
                    debug!(session_id = %session.id(), rule = %rule.name(), "Rule matched");
                    self.audit(|| AuditEntry::RuleMatched {
                        session_id: session.id().to_string(),
                        rule: rule.name(),
                        timestamp: Utc::now(),
                    });
                    return match rule.action() {
                        RuleAction::Ask(text) => Route::Direct(text),
                        RuleAction::AskAi(instruction) => Route::Augmented {
                            rule,
                            instruction: Some(instruction.clone()),
                        },
                        RuleAction::Collect(names) => Route::Augmented {
                            rule,
                            instruction: self.collect_instruction(names, session),
                        },
                    };
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        session_id = %session.id(),
                        rule = %rule.name(),
                        error = %e,
                        "Condition failed, treating as non-match"
                    );
                    self.audit(|| AuditEntry::ConditionFailed {
                        session_id: session.id().to_string(),
                        rule: rule.name(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
        Route::Chat
    }

    fn collect_instruction(&self, names: &[String], session: &Session) -> Option<String> {
        let wanted: Vec<FieldSpec> = names
            .iter()
            .filter_map(|name| self.fields.iter().find(|f| &f.name == name))
            .cloned()
            .collect();
        let history = session.messages();
        let missing = field::missing_fields(&wanted, &history);
        prompt::collect_instruction(&missing)
    }

    /// The LLM call loop with tool resolution.
    async fn complete(
        &self,
        turn: &mut Turn<'_>,
        transient: &[Message],
        settings: &ModelSettings,
        tools: &ToolRegistry,
    ) -> Result<Message> {
        let definitions = tools.definitions();
        let mut rounds = 0usize;
        let mut last_text = String::new();

        loop {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: prompt::assemble(&self.instructions, turn.session.messages(), transient),
                settings: settings.clone(),
                tools: definitions.clone(),
            };

            debug!(
                session_id = %turn.session_id(),
                round = rounds,
                messages = request.messages.len(),
                "Calling chat model"
            );

            let started = Instant::now();
            let result = turn
                .ctx
                .run(self.chat_model.generate(turn.ctx, request))
                .await?;
            self.audit(|| AuditEntry::LlmCall {
                session_id: turn.session_id().to_string(),
                round: rounds,
                success: result.is_ok(),
                duration_ms: duration_ms(started.elapsed()),
                timestamp: Utc::now(),
            });
            let reply = result?;

            if reply.has_text() {
                last_text = reply.content().to_string();
            }

            if !reply.has_tool_calls() {
                turn.session.push(reply.clone());
                return Ok(reply);
            }

            if rounds == self.max_tool_rounds {
                warn!(
                    session_id = %turn.session_id(),
                    rounds,
                    "Tool round budget exhausted"
                );
                if reply.has_text() {
                    // Drop the unanswered tool calls, keep the text.
                    let reply = Message::assistant(reply.content());
                    turn.session.push(reply.clone());
                    return Ok(reply);
                }
                return Err(ToolError::RoundsExhausted { rounds, last_text }.into());
            }

            rounds += 1;
            turn.transition(TurnState::ToolLoop);
            let results = self.run_tools(turn, tools, &reply, rounds).await?;
            turn.session.extend(std::iter::once(reply).chain(results));
        }
    }

    /// Run one round of tool calls, in the order requested.
    ///
    /// Tool failures become tool-role messages carrying `{"error": ...}`;
    /// only cancellation aborts the round.
    async fn run_tools(
        &self,
        turn: &Turn<'_>,
        tools: &ToolRegistry,
        reply: &Message,
        round: usize,
    ) -> Result<Vec<Message>> {
        let mut results = Vec::with_capacity(reply.tool_calls().len());

        for call in reply.tool_calls() {
            debug!(
                session_id = %turn.session_id(),
                round,
                tool = %call.name(),
                call_id = %call.id(),
                "Executing tool call"
            );

            let started = Instant::now();
            let outcome = turn
                .ctx
                .run(tools.execute(turn.ctx, call.name(), call.arguments()))
                .await?;
            let elapsed_ms = duration_ms(started.elapsed());

            let content = match &outcome {
                Ok(value) => value.to_string(),
                Err(e) => {
                    warn!(tool = %call.name(), error = %e, "Tool execution failed");
                    serde_json::json!({ "error": e.to_string() }).to_string()
                }
            };

            self.audit(|| AuditEntry::ToolCall {
                session_id: turn.session_id().to_string(),
                tool: call.name().to_string(),
                call_id: call.id().to_string(),
                success: outcome.is_ok(),
                duration_ms: elapsed_ms,
                timestamp: Utc::now(),
            });

            results.push(Message::tool_result(call.id(), call.name(), content));
        }

        Ok(results)
    }

    fn audit(&self, entry: impl FnOnce() -> AuditEntry) {
        if let Some(sink) = &self.audit {
            sink.record(entry());
        }
    }
}
