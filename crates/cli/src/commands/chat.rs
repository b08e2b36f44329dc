//! `colloquy chat`: interactive or single-message chat.

use colloquy_agent::{Agent, AgentBuilder, ChatOptions, TracingAuditSink, TurnResult};
use colloquy_config::{AppConfig, SessionBackend, SessionConfig};
use colloquy_core::condition;
use colloquy_core::context::TurnContext;
use colloquy_core::error::ToolError;
use colloquy_core::session::SessionStore;
use colloquy_core::tool::{FnTool, ParamSchema};
use colloquy_memory::{FileSessionStore, InMemorySessionStore};
use colloquy_providers::OpenAiCompatModel;
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

const HELP_INSTRUCTION: &str = "The user is asking for help. Briefly explain that you can \
     answer questions and tell the current date and time, then ask what they need.";

const HELP_FALLBACK: &str =
    "I can answer questions and tell you the current date and time. What do you need?";

pub async fn run(
    session: Option<String>,
    message: Option<String>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup instructions
    if config.api_key.is_none() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    COLLOQUY_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let agent = build_agent(&config, verbose).await?;
    let session_id = session.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    tracing::debug!(session_id = %session_id, model = %agent.model(), "Starting chat");

    if let Some(msg) = message {
        // Single message mode
        let result = run_turn(&agent, &session_id, &msg).await?;
        println!("{}", result.text());
        return Ok(());
    }

    println!();
    println!("  Colloquy: interactive mode");
    println!();
    println!("  Agent:     {}", agent.name());
    println!("  Model:     {} ({})", agent.model(), config.provider);
    println!("  Session:   {session_id}");
    println!("  Tools:     {}", agent.tools().names().join(", "));
    println!();
    println!("  Type your message and press Enter. Ctrl+C cancels a reply.");
    println!("  Type 'exit' to quit.");
    println!();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "exit" || text == "quit" {
            break;
        }

        match run_turn(&agent, &session_id, text).await {
            Ok(result) => {
                println!();
                for line in result.text().lines() {
                    println!("  {} > {line}", agent.name());
                }
                println!();
            }
            Err(e) if e.is_cancelled() => eprintln!("  [Cancelled]"),
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Session {session_id} saved. Goodbye!");
    println!();
    Ok(())
}

async fn build_agent(config: &AppConfig, verbose: bool) -> colloquy_core::Result<Agent> {
    let chat_model = OpenAiCompatModel::new(
        config.provider.clone(),
        config.base_url.clone(),
        config.api_key.clone().unwrap_or_default(),
    )
    .with_timeout(config.request_timeout())
    .with_known_models(config.known_models.clone());

    AgentBuilder::new(config.agent.name.clone())
        .with_description(config.agent.description.clone())
        .with_instructions(config.agent.instructions.clone())
        .with_model(config.model.clone())
        .with_model_settings(config.model_settings())
        .with_chat_model(Arc::new(chat_model))
        .with_session_store(session_store(&config.session))
        .with_max_tool_rounds(config.agent.max_tool_rounds)
        .with_debug_logging(config.agent.debug_logging || verbose)
        .with_audit_sink(Arc::new(TracingAuditSink))
        .with_tool(current_time_tool())
        .when(condition::contains("help"))
        .named("help")
        .ask_ai(HELP_INSTRUCTION)
        .or_else(HELP_FALLBACK)
        .build()
        .build()
        .await
}

/// Run one turn; Ctrl+C cancels it.
async fn run_turn(agent: &Agent, session_id: &str, text: &str) -> colloquy_core::Result<TurnResult> {
    let ctx = TurnContext::new();
    let cancel = ctx.cancel_token().clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = agent.chat(&ctx, session_id, text, ChatOptions::default()).await;
    watcher.abort();
    result
}

fn session_store(config: &SessionConfig) -> Arc<dyn SessionStore> {
    match config.backend {
        SessionBackend::Memory => {
            let store = Arc::new(InMemorySessionStore::new());
            if let Some(ttl) = config.ttl() {
                spawn_sweeper(Arc::clone(&store), ttl);
            }
            store as Arc<dyn SessionStore>
        }
        SessionBackend::File => {
            let dir = config
                .directory
                .clone()
                .unwrap_or_else(FileSessionStore::default_dir);
            Arc::new(FileSessionStore::new(dir))
        }
    }
}

fn spawn_sweeper(store: Arc<InMemorySessionStore>, ttl: Duration) {
    let period = (ttl / 2).clamp(Duration::from_secs(1), Duration::from_secs(300));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            store.sweep_expired(ttl).await;
        }
    });
}

fn current_time_tool() -> FnTool {
    FnTool::new(
        "current_time",
        "Get the current date and time in UTC",
        ParamSchema::new().build(),
        |_| async {
            let now = chrono::Utc::now();
            Ok::<Value, ToolError>(json!({
                "utc": now.to_rfc3339(),
                "unix": now.timestamp(),
            }))
        },
    )
}
