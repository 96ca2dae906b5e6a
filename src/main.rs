//! Drone - 编码智能体控制平面
//!
//! 入口：加载配置、初始化日志、创建 Agent，并运行按行读取的 REPL。
//! 用法：`drone [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use drone::config::{load_config, AppConfig};
use drone::core::ApprovalMode;
use drone::llm::{LlmClient, MockLlmClient, OllamaClient};
use drone::memory::SessionStore;
use drone::{observability, Agent, AgentBuilder, AgentEvent};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const HELP: &str = "Commands: /mode [suggest|auto_edit|full_auto|yolo], /clear, /save [name], /load <name>, /sessions, /skills, /skill <id>, /context, /status, /quit";

fn build_llm(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "ollama" => Arc::new(OllamaClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            cfg.llm.timeout_secs,
        )),
        other => {
            if other != "mock" {
                tracing::warn!(provider = %other, "unknown provider, falling back to mock");
            }
            Arc::new(MockLlmClient::new())
        }
    }
}

fn render(event: &AgentEvent) -> String {
    match event {
        AgentEvent::Thinking { text } => format!("  … {}", text),
        AgentEvent::ToolCall { intent } => format!("  → {}({})", intent.name, intent.arguments),
        AgentEvent::ToolResult { name, result } => {
            let preview: String = result.chars().take(400).collect();
            format!("  ← {}: {}", name, preview)
        }
        AgentEvent::ApprovalNeeded { name, risk, reason, .. } => {
            format!("  ! approval needed for {} [{}]: {}", name, risk, reason)
        }
        AgentEvent::Response { text } => text.clone(),
        AgentEvent::Error { message } => format!("error: {}", message),
    }
}

/// 处理斜杠命令；返回 false 表示退出
async fn handle_command(agent: &Agent, store: &SessionStore, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

    match cmd {
        "/quit" | "/exit" => return Ok(false),
        "/mode" => {
            let gate = agent.approval_gate();
            let mode = match arg {
                Some(name) => {
                    let mode: ApprovalMode = name.parse().map_err(anyhow::Error::msg)?;
                    gate.set_mode(mode);
                    mode
                }
                None => gate.toggle_mode(),
            };
            println!("approval mode: {} ({})", mode, mode.description());
        }
        "/clear" => {
            agent.clear_session().await;
            println!("session cleared");
        }
        "/save" => {
            let mut session = agent.session_snapshot().await;
            let path = store.save(&mut session, arg)?;
            agent.replace_session(session).await;
            println!("saved to {}", path.display());
        }
        "/load" => {
            let name = arg.context("usage: /load <name or id>")?;
            let session = store.load(name)?;
            println!("loaded {}", session.context_summary());
            agent.replace_session(session).await;
        }
        "/sessions" => {
            let sessions = store.list()?;
            if sessions.is_empty() {
                println!("no saved sessions in {}", store.dir().display());
            }
            for s in sessions {
                println!(
                    "{}  {}  {} messages  {}",
                    s.updated_at.format("%Y-%m-%d %H:%M"),
                    s.name.as_deref().unwrap_or(&s.id),
                    s.message_count,
                    s.file.display()
                );
            }
        }
        "/skills" => {
            for s in agent.skills().list() {
                let marker = if s.active { "*" } else { " " };
                println!("{} {}  {} (v{})  {}", marker, s.id, s.name, s.version, s.description);
            }
        }
        "/skill" => {
            let id = arg.context("usage: /skill <id>")?;
            if agent.skills().deactivate(id) {
                println!("skill {} deactivated", id);
            } else {
                agent.activate_skill(id)?;
                println!("skill {} activated", id);
            }
        }
        "/context" => match agent.reload_project_context().await {
            Some(summary) => println!("{}", summary),
            None => println!("project context is disabled"),
        },
        "/status" => {
            let session = agent.session_snapshot().await;
            println!("{}", session.context_summary());
            println!("approval mode: {}", agent.approval_gate().mode());
            println!("tools: {}", agent.tools().tool_names().join(", "));
            println!("active skills: {}", agent.skills().active_ids().join(", "));
            println!("hooks: {}", agent.hooks().hooks(None).len());
        }
        _ => println!("{}", HELP),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let store = SessionStore::new(&cfg.session.dir);
    let agent = AgentBuilder::from_config(build_llm(&cfg), &cfg).build();

    println!("drone ready. {}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('/') {
            match handle_command(&agent, &store, line).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    println!("error: {:#}", e);
                    continue;
                }
            }
        }

        let mut stream = agent.step(line).context("Failed to start turn")?;
        while let Some(event) = stream.next().await {
            println!("{}", render(&event));
        }
    }
    Ok(())
}
