//! End-to-end turn scenarios against a scripted chat model.
//!
//! Each test drives `Agent::chat` through the public API and inspects the
//! session log, the requests the model received, and the audit trail.

use std::sync::Arc;
use std::time::Duration;

use colloquy_agent::{AgentBuilder, AuditEntry, ChatOptions, MemoryAuditSink, TurnPath};
use colloquy_core::condition;
use colloquy_core::error::{ErrorKind, ModelError, ToolError};
use colloquy_core::message::{Message, Role, ToolCallRequest};
use colloquy_core::tool::{FnTool, ParamSchema};
use colloquy_core::{FieldSpec, TurnContext};
use colloquy_memory::FileSessionStore;
use colloquy_providers::{ScriptedChatModel, ScriptedReply};
use serde_json::{Value, json};

// ── Helpers ──────────────────────────────────────────────────────────────

fn add_tool() -> FnTool {
    FnTool::new(
        "add",
        "Add two numbers",
        ParamSchema::new()
            .required("a", "number", "First operand")
            .required("b", "number", "Second operand")
            .build(),
        |args: Value| async move {
            let a = args["a"].as_f64().ok_or_else(|| ToolError::InvalidArguments {
                tool_name: "add".into(),
                reason: "a must be a number".into(),
            })?;
            let b = args["b"].as_f64().unwrap_or_default();
            Ok::<Value, ToolError>(json!(a + b))
        },
    )
}

fn constant_tool(name: &str, value: &'static str) -> FnTool {
    FnTool::new(name, "Returns a constant", ParamSchema::new().build(), move |_| async move {
        Ok::<Value, ToolError>(json!(value))
    })
}

async fn explode(_args: Value) -> Result<Value, ToolError> {
    panic!("kaboom")
}

async fn stall(_args: Value) -> Result<Value, ToolError> {
    tokio::time::sleep(Duration::from_secs(60)).await;
    Ok(Value::Null)
}

fn network_error() -> ScriptedReply {
    ScriptedReply::Error(ModelError::Network {
        provider: "scripted".into(),
        message: "connection refused".into(),
    })
}

/// Every tool-role message answers a call made by an earlier assistant message.
fn assert_tool_results_reference_calls(messages: &[Message]) {
    for (i, msg) in messages.iter().enumerate() {
        if msg.role() != Role::Tool {
            continue;
        }
        let call_id = msg.tool_call_id().expect("tool message without call id");
        let answered = messages[..i].iter().any(|m| {
            m.role() == Role::Assistant && m.tool_calls().iter().any(|c| c.id() == call_id)
        });
        assert!(answered, "tool message {call_id} has no matching request");
    }
}

fn roles(messages: &[Message]) -> Vec<Role> {
    messages.iter().map(|m| m.role()).collect()
}

// ── Direct Ask ───────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_ask_skips_the_model() {
    let model = Arc::new(ScriptedChatModel::single_text("unused"));
    let agent = AgentBuilder::new("support")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .when(condition::contains("hours"))
        .ask("We are open 9 to 5, Monday to Friday.")
        .build()
        .when(condition::contains("open"))
        .ask("Second rule, never reached.")
        .build()
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "When are you OPEN? What are your Hours?", ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(result.text(), "We are open 9 to 5, Monday to Friday.");
    assert_eq!(model.calls(), 0);
    assert_eq!(roles(&result.session.messages()), vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn empty_utterance_is_recorded_and_routed() {
    let agent = AgentBuilder::new("support")
        .with_model("test-model")
        .with_chat_model(Arc::new(ScriptedChatModel::single_text("unused")))
        .when(condition::count(1))
        .ask("Say something!")
        .build()
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "", ChatOptions::default())
        .await
        .unwrap();

    let messages = result.session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content(), "");
    assert_eq!(result.text(), "Say something!");
}

// ── AskAI with fallback ──────────────────────────────────────────────────

#[tokio::test]
async fn ask_ai_injects_transient_instruction() {
    let model = Arc::new(ScriptedChatModel::single_text("Our plans start at $10."));
    let agent = AgentBuilder::new("sales")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .when(condition::contains("price"))
        .ask_ai("Mention the annual discount.")
        .or_else("Please see our pricing page.")
        .build()
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "What's the price?", ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(result.text(), "Our plans start at $10.");
    let sent = &model.requests()[0].messages;
    let last = sent.last().unwrap();
    assert_eq!(last.role(), Role::System);
    assert_eq!(last.content(), "Mention the annual discount.");

    // Transient instructions never reach the log.
    let messages = result.session.messages();
    assert!(messages.iter().all(|m| m.role() != Role::System));
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn ask_ai_falls_back_when_the_model_fails() {
    let model = Arc::new(ScriptedChatModel::new([network_error()]));
    let audit = Arc::new(MemoryAuditSink::new());
    let agent = AgentBuilder::new("sales")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .with_audit_sink(audit.clone())
        .when(condition::contains("price"))
        .ask_ai("Mention the annual discount.")
        .or_else("Please see our pricing page.")
        .build()
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "price?", ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(result.text(), "Please see our pricing page.");
    assert_eq!(model.calls(), 1);
    assert_eq!(roles(&result.session.messages()), vec![Role::User, Role::Assistant]);
    assert!(audit.entries().iter().any(|e| matches!(
        e,
        AuditEntry::TurnCommitted {
            path: TurnPath::Fallback,
            ..
        }
    )));
}

#[tokio::test]
async fn plain_chat_failure_is_not_masked_by_other_rules_fallback() {
    let model = Arc::new(ScriptedChatModel::new([network_error()]));
    let agent = AgentBuilder::new("sales")
        .with_model("test-model")
        .with_chat_model(model)
        .when(condition::contains("price"))
        .ask_ai("Mention the annual discount.")
        .or_else("Please see our pricing page.")
        .build()
        .build()
        .await
        .unwrap();

    let err = agent
        .chat(&TurnContext::new(), "s1", "hello", ChatOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::LlmError);
    assert_eq!(agent.session("s1").await.unwrap().message_count(), 1);
}

// ── Tool loop ────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_loop_feeds_results_back() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::tool_call("call_1", "add", json!({"a": 2, "b": 3})),
        ScriptedReply::text("2 + 3 = 5"),
    ]));
    let agent = AgentBuilder::new("calc")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .with_tool(add_tool())
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "What is 2 + 3?", ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(result.text(), "2 + 3 = 5");
    let messages = result.session.messages();
    assert_eq!(
        roles(&messages),
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(messages[2].tool_call_id(), Some("call_1"));
    assert_eq!(messages[2].name(), Some("add"));
    assert_eq!(messages[2].content(), "5.0");
    assert_tool_results_reference_calls(&messages);

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools[0].name, "add");
    assert_eq!(requests[1].messages.last().unwrap().role(), Role::Tool);
}

#[tokio::test]
async fn multiple_calls_in_one_round_keep_request_order() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::ToolCalls {
            content: String::new(),
            calls: vec![
                ToolCallRequest::new("c1", "first", "{}"),
                ToolCallRequest::new("c2", "second", ""),
            ],
        },
        ScriptedReply::text("done"),
    ]));
    let agent = AgentBuilder::new("multi")
        .with_model("test-model")
        .with_chat_model(model)
        .with_tool(constant_tool("first", "one"))
        .with_tool(constant_tool("second", "two"))
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "go", ChatOptions::default())
        .await
        .unwrap();

    let messages = result.session.messages();
    assert_eq!(messages[2].tool_call_id(), Some("c1"));
    assert_eq!(messages[2].content(), r#""one""#);
    assert_eq!(messages[3].tool_call_id(), Some("c2"));
    assert_eq!(messages[3].content(), r#""two""#);
}

#[tokio::test]
async fn unknown_tool_reports_error_and_continues() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::tool_call("call_9", "teleport", json!({})),
        ScriptedReply::text("I can't do that."),
    ]));
    let agent = AgentBuilder::new("calc")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .with_tool(add_tool())
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "Beam me up", ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(result.text(), "I can't do that.");
    let messages = result.session.messages();
    let tool_msg = &messages[2];
    assert_eq!(tool_msg.role(), Role::Tool);
    let payload: Value = serde_json::from_str(tool_msg.content()).unwrap();
    assert_eq!(payload["error"], "unknown tool teleport");
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn malformed_arguments_are_reported_to_the_model() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::ToolCalls {
            content: String::new(),
            calls: vec![ToolCallRequest::new("c1", "add", "{not json")],
        },
        ScriptedReply::text("Sorry, let me retry."),
    ]));
    let agent = AgentBuilder::new("calc")
        .with_model("test-model")
        .with_chat_model(model)
        .with_tool(add_tool())
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "add", ChatOptions::default())
        .await
        .unwrap();

    let payload: Value = serde_json::from_str(result.session.messages()[2].content()).unwrap();
    assert!(payload["error"].as_str().unwrap().contains("invalid arguments for add"));
}

#[tokio::test]
async fn panicking_tool_becomes_an_error_result() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::tool_call("c1", "explode", json!({})),
        ScriptedReply::text("That tool is broken."),
    ]));
    let audit = Arc::new(MemoryAuditSink::new());
    let agent = AgentBuilder::new("calc")
        .with_model("test-model")
        .with_chat_model(model)
        .with_audit_sink(audit.clone())
        .with_tool(FnTool::new("explode", "Always panics", ParamSchema::new().build(), explode))
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "try it", ChatOptions::default())
        .await
        .unwrap();

    let payload: Value = serde_json::from_str(result.session.messages()[2].content()).unwrap();
    assert!(payload["error"].as_str().unwrap().contains("kaboom"));
    assert!(audit
        .entries()
        .iter()
        .any(|e| matches!(e, AuditEntry::ToolCall { success: false, .. })));
}

#[tokio::test]
async fn extra_tools_shadow_registry_for_one_turn() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::tool_call("c1", "lookup", json!({})),
        ScriptedReply::text("first"),
        ScriptedReply::tool_call("c2", "lookup", json!({})),
        ScriptedReply::text("second"),
    ]));
    let agent = AgentBuilder::new("lookup")
        .with_model("test-model")
        .with_chat_model(model)
        .with_tool(constant_tool("lookup", "agent"))
        .build()
        .await
        .unwrap();

    let ctx = TurnContext::new();
    let first = agent
        .chat(&ctx, "s1", "one", ChatOptions::new().with_tool(constant_tool("lookup", "turn")))
        .await
        .unwrap();
    assert_eq!(first.session.messages()[2].content(), r#""turn""#);

    let second = agent.chat(&ctx, "s1", "two", ChatOptions::default()).await.unwrap();
    let messages = second.session.messages();
    assert_eq!(messages[6].content(), r#""agent""#);
    assert_tool_results_reference_calls(&messages);
}

// ── Tool round budget ────────────────────────────────────────────────────

#[tokio::test]
async fn exhausted_rounds_without_text_fail_with_last_text() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::ToolCalls {
            content: "Let me check.".into(),
            calls: vec![ToolCallRequest::new("c1", "add", r#"{"a":1,"b":1}"#)],
        },
        ScriptedReply::tool_call("c2", "add", json!({"a": 2, "b": 2})),
        ScriptedReply::tool_call("c3", "add", json!({"a": 3, "b": 3})),
    ]));
    let agent = AgentBuilder::new("calc")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .with_tool(add_tool())
        .with_max_tool_rounds(2)
        .build()
        .await
        .unwrap();

    let err = agent
        .chat(&TurnContext::new(), "s1", "loop forever", ChatOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ToolError);
    match err {
        colloquy_core::Error::Tool(ToolError::RoundsExhausted { rounds, last_text }) => {
            assert_eq!(rounds, 2);
            assert_eq!(last_text, "Let me check.");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(model.calls(), 3);

    // User message plus two complete rounds.
    let session = agent.session("s1").await.unwrap();
    let messages = session.messages();
    assert_eq!(messages.len(), 5);
    assert_tool_results_reference_calls(&messages);
}

#[tokio::test]
async fn exhausted_rounds_with_text_return_that_text() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::tool_call("c1", "add", json!({"a": 1, "b": 1})),
        ScriptedReply::ToolCalls {
            content: "The sum is 2.".into(),
            calls: vec![ToolCallRequest::new("c2", "add", r#"{"a":2,"b":2}"#)],
        },
    ]));
    let agent = AgentBuilder::new("calc")
        .with_model("test-model")
        .with_chat_model(model)
        .with_tool(add_tool())
        .with_max_tool_rounds(1)
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "1 + 1", ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(result.text(), "The sum is 2.");
    assert!(!result.message.has_tool_calls());
    let messages = result.session.messages();
    assert_eq!(messages.len(), 4);
    assert!(!messages[3].has_tool_calls());
}

// ── Count condition ──────────────────────────────────────────────────────

#[tokio::test]
async fn count_condition_kicks_in_on_later_turns() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::text("Hi there."),
        ScriptedReply::text("Anything else?"),
    ]));
    let agent = AgentBuilder::new("closer")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .when(condition::count(3))
        .ask_ai("Start wrapping up the conversation.")
        .build()
        .build()
        .await
        .unwrap();

    let ctx = TurnContext::new();
    agent.chat(&ctx, "s1", "hello", ChatOptions::default()).await.unwrap();
    let second = agent.chat(&ctx, "s1", "thanks", ChatOptions::default()).await.unwrap();

    let requests = model.requests();
    assert_eq!(requests[0].messages.last().unwrap().role(), Role::User);
    let last = requests[1].messages.last().unwrap();
    assert_eq!(last.role(), Role::System);
    assert_eq!(last.content(), "Start wrapping up the conversation.");
    assert_eq!(second.session.message_count(), 4);
}

// ── Missing fields ───────────────────────────────────────────────────────

#[tokio::test]
async fn collect_asks_only_for_missing_fields() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::text("Thanks! What's your email?"),
        ScriptedReply::text("All set."),
    ]));
    let agent = AgentBuilder::new("intake")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .with_fields([
            FieldSpec::required("name", "What is your name?"),
            FieldSpec::required("email", "What is your email address?"),
            FieldSpec::optional("phone", "Can we have a phone number?"),
        ])
        .when(condition::missing(["name", "email"]))
        .collect(["name", "email", "phone"])
        .or_else("Could you tell me your name and email?")
        .build()
        .build()
        .await
        .unwrap();

    let ctx = TurnContext::new();
    agent
        .chat(&ctx, "s1", "Hi, my name is Ada.", ChatOptions::default())
        .await
        .unwrap();

    let instruction = model.requests()[0].messages.last().unwrap().clone();
    assert_eq!(instruction.role(), Role::System);
    assert!(instruction.content().contains("- email: What is your email address?"));
    assert!(instruction.content().contains("- phone (optional)"));
    assert!(!instruction.content().contains("- name:"));

    // Once both are mentioned the rule stops matching.
    agent
        .chat(&ctx, "s1", "My email is ada@example.com", ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(model.requests()[1].messages.last().unwrap().role(), Role::User);
}

#[tokio::test]
async fn collect_falls_back_when_the_model_fails() {
    let model = Arc::new(ScriptedChatModel::new([network_error()]));
    let agent = AgentBuilder::new("intake")
        .with_model("test-model")
        .with_chat_model(model)
        .with_field(FieldSpec::required("email", "What is your email?"))
        .when(condition::missing(["email"]))
        .collect(["email"])
        .or_else("Could you share your email?")
        .build()
        .build()
        .await
        .unwrap();

    let result = agent
        .chat(&TurnContext::new(), "s1", "hello", ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(result.text(), "Could you share your email?");
}

#[tokio::test]
async fn collect_with_nothing_missing_runs_as_plain_chat() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::text("Noted."),
        network_error(),
    ]));
    let audit = Arc::new(MemoryAuditSink::new());
    let agent = AgentBuilder::new("intake")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .with_audit_sink(audit.clone())
        .with_field(FieldSpec::required("email", "What is your email?"))
        .when(condition::always())
        .collect(["email"])
        .or_else("Could you share your email?")
        .build()
        .build()
        .await
        .unwrap();

    let ctx = TurnContext::new();
    agent
        .chat(&ctx, "s1", "My email is ada@example.com", ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(model.requests()[0].messages.last().unwrap().role(), Role::User);
    assert!(audit.entries().iter().any(|e| matches!(
        e,
        AuditEntry::TurnCommitted {
            path: TurnPath::Chat,
            ..
        }
    )));

    // Plain chat never uses the rule fallback.
    let err = agent
        .chat(&ctx, "s1", "anything else?", ChatOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LlmError);
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancellation_during_model_call_keeps_only_the_user_message() {
    let model = Arc::new(
        ScriptedChatModel::single_text("too late").with_delay(Duration::from_secs(10)),
    );
    let agent = AgentBuilder::new("slow")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .build()
        .await
        .unwrap();

    let ctx = TurnContext::new();
    let trigger = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = agent
        .chat(&ctx, "s1", "hello?", ChatOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(model.calls(), 1);
    let session = agent.session("s1").await.unwrap();
    assert_eq!(roles(&session.messages()), vec![Role::User]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_tool_discards_the_partial_round() {
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::tool_call("c1", "stall", json!({})),
        ScriptedReply::text("unreachable"),
    ]));
    let agent = AgentBuilder::new("slow")
        .with_model("test-model")
        .with_chat_model(model)
        .with_tool(FnTool::new("stall", "Takes forever", ParamSchema::new().build(), stall))
        .build()
        .await
        .unwrap();

    let ctx = TurnContext::new();
    let trigger = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = agent
        .chat(&ctx, "s1", "go", ChatOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(agent.session("s1").await.unwrap().message_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn passed_deadline_is_reported_as_cancelled() {
    let model = Arc::new(
        ScriptedChatModel::single_text("too late").with_delay(Duration::from_secs(10)),
    );
    let agent = AgentBuilder::new("slow")
        .with_model("test-model")
        .with_chat_model(model)
        .build()
        .await
        .unwrap();

    let ctx = TurnContext::new().with_timeout(Duration::from_millis(50));
    let err = agent
        .chat(&ctx, "s1", "hello?", ChatOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(err.to_string().contains("deadline"));
}

#[tokio::test]
async fn cancellation_is_never_replaced_by_fallback() {
    let model = Arc::new(ScriptedChatModel::single_text("unused"));
    let agent = AgentBuilder::new("svc")
        .with_model("test-model")
        .with_chat_model(model.clone())
        .when(condition::always())
        .ask_ai("Be nice.")
        .or_else("fallback")
        .build()
        .build()
        .await
        .unwrap();

    let ctx = TurnContext::new();
    ctx.cancel();
    let err = agent.chat(&ctx, "s1", "hi", ChatOptions::default()).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(model.calls(), 0);
    assert_eq!(agent.session("s1").await.unwrap().message_count(), 1);
}

// ── Concurrency ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn turns_on_one_session_are_serialized() {
    let model = Arc::new(
        ScriptedChatModel::new([ScriptedReply::text("a1"), ScriptedReply::text("a2")])
            .with_delay(Duration::from_millis(50)),
    );
    let agent = Arc::new(
        AgentBuilder::new("busy")
            .with_model("test-model")
            .with_chat_model(model)
            .build()
            .await
            .unwrap(),
    );

    let handles: Vec<_> = ["u1", "u2"]
        .into_iter()
        .map(|text| {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move {
                agent
                    .chat(&TurnContext::new(), "shared", text, ChatOptions::default())
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let session = agent.session("shared").await.unwrap();
    assert_eq!(
        roles(&session.messages()),
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}

#[tokio::test(start_paused = true)]
async fn distinct_sessions_run_concurrently() {
    let model = Arc::new(
        ScriptedChatModel::new([ScriptedReply::text("a"), ScriptedReply::text("b")])
            .with_delay(Duration::from_millis(100)),
    );
    let agent = Arc::new(
        AgentBuilder::new("busy")
            .with_model("test-model")
            .with_chat_model(model)
            .build()
            .await
            .unwrap(),
    );

    let left_ctx = TurnContext::new();
    let right_ctx = TurnContext::new();
    let start = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        agent.chat(&left_ctx, "left", "hi", ChatOptions::default()),
        agent.chat(&right_ctx, "right", "hi", ChatOptions::default()),
    );
    a.unwrap();
    b.unwrap();
    assert!(start.elapsed() < Duration::from_millis(150));
}

// ── Persistence ──────────────────────────────────────────────────────────

#[tokio::test]
async fn file_store_persists_committed_turns() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedChatModel::new([
        ScriptedReply::tool_call("call_1", "add", json!({"a": 20, "b": 22})),
        ScriptedReply::text("42"),
    ]));
    let agent = AgentBuilder::new("calc")
        .with_model("test-model")
        .with_chat_model(model)
        .with_tool(add_tool())
        .with_session_store(Arc::new(FileSessionStore::new(dir.path())))
        .build()
        .await
        .unwrap();

    agent
        .chat(&TurnContext::new(), "user/7", "20 + 22?", ChatOptions::default())
        .await
        .unwrap();

    use colloquy_core::SessionStore;
    let reopened = FileSessionStore::new(dir.path());
    let session = reopened.get("user/7").await.unwrap();
    let messages = session.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].tool_calls()[0].id(), "call_1");
    assert_eq!(messages[3].content(), "42");
    assert_tool_results_reference_calls(&messages);
}
