//! Agent 门面
//!
//! AgentBuilder 组装 LLM、长期记忆、工具执行器、审批闸门、钩子、技能与项目上下文；
//! Agent::step 对单条用户输入启动一轮，返回按发出顺序消费的事件流（TurnStream）。
//! 同一会话同一时刻只允许一个打开的事件流，否则立即返回 TurnInProgress；
//! 事件流读到终止事件或被丢弃时才释放占用。
//! 丢弃事件流即取消本轮：进行中的模型/工具调用被放弃，会话不再被写入。
//! 协作方 panic 被捕获为一次 error 终止事件。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{FutureExt, Stream};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::AppConfig;
use crate::core::project_context::default_global_file;
use crate::core::{AgentError, ApprovalGate, HookEvent, HookManager, ProjectContext};
use crate::llm::LlmClient;
use crate::memory::{InMemoryStore, MemoryStore, Message, Session};
use crate::react::{run_turn, AgentEvent, TurnContext};
use crate::skills::{SkillError, SkillRegistry};
use crate::tools::{CatTool, EchoTool, LsTool, ToolExecutor, ToolRegistry};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SEARCH_LIMIT: usize = 5;

/// 当前轮次的占用标记：slot 中存放轮次编号，0 表示空闲。
/// 由事件流持有，只释放属于自己的编号
struct TurnLease {
    slot: Arc<AtomicU64>,
    id: u64,
}

impl TurnLease {
    fn acquire(slot: &Arc<AtomicU64>, id: u64) -> Result<Self, AgentError> {
        slot.compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AgentError::TurnInProgress)?;
        Ok(Self {
            slot: slot.clone(),
            id,
        })
    }
}

impl Drop for TurnLease {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.id, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// 单轮事件流；以 response 或 error 结束。丢弃即取消本轮
pub struct TurnStream {
    rx: mpsc::Receiver<AgentEvent>,
    _cancel: DropGuard,
    lease: Option<TurnLease>,
}

impl TurnStream {
    /// 下一个事件；本轮结束后返回 None
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        let item = self.rx.recv().await;
        self.observe(&item);
        item
    }

    /// 读到终止事件（或通道关闭）时释放占用
    fn observe(&mut self, item: &Option<AgentEvent>) {
        if item.as_ref().map_or(true, AgentEvent::is_terminal) {
            self.lease.take();
        }
    }
}

impl Stream for TurnStream {
    type Item = AgentEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AgentEvent>> {
        let this = self.get_mut();
        let poll = this.rx.poll_recv(cx);
        if let Poll::Ready(item) = &poll {
            this.observe(item);
        }
        poll
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 基础提示词 + 项目上下文；两者皆空时为 None
fn compose_system_prompt(base: Option<&str>, project: Option<&ProjectContext>) -> Option<String> {
    let parts: Vec<String> = base
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .into_iter()
        .chain(project.map(ProjectContext::system_prompt_injection).filter(|p| !p.is_empty()))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

pub struct Agent {
    ctx: Arc<TurnContext>,
    session: Arc<Mutex<Session>>,
    base_prompt: Option<String>,
    project: std::sync::Mutex<Option<ProjectContext>>,
    active_turn: Arc<AtomicU64>,
    turn_counter: AtomicU64,
}

impl Agent {
    pub fn builder(llm: Arc<dyn LlmClient>) -> AgentBuilder {
        AgentBuilder::new(llm)
    }

    /// 启动一轮。须在 tokio 运行时内调用
    pub fn step(&self, input: impl Into<String>) -> Result<TurnStream, AgentError> {
        let id = self.turn_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let lease = TurnLease::acquire(&self.active_turn, id)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let ctx = self.ctx.clone();
        let session = self.session.clone();
        let input = input.into();

        tokio::spawn(async move {
            let caught = AssertUnwindSafe(async {
                let mut session = session.lock().await;
                run_turn(&ctx, &mut session, &input, &tx, &token).await
            })
            .catch_unwind()
            .await;
            let outcome = caught.unwrap_or_else(|payload| Err(AgentError::TurnPanicked(panic_message(payload.as_ref()))));

            let terminal = match outcome {
                Ok(text) => AgentEvent::Response { text },
                Err(AgentError::Cancelled) => {
                    tracing::debug!(turn = id, "turn cancelled by consumer");
                    return;
                }
                Err(e) => {
                    tracing::warn!(turn = id, error = %e, "turn failed");
                    let message = e.to_string();
                    if let Err(e) = ctx.hooks.trigger(HookEvent::Error, json!({ "message": message })).await {
                        tracing::debug!(turn = id, error = %e, "error hook blocked");
                    }
                    AgentEvent::Error { message }
                }
            };
            let _ = tx.send(terminal).await;
        });

        Ok(TurnStream {
            rx,
            _cancel: cancel.drop_guard(),
            lease: Some(lease),
        })
    }

    /// 会话副本（进行中的轮次结束后才返回）
    pub async fn session_snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }

    pub async fn clear_session(&self) {
        self.session.lock().await.clear();
    }

    /// 替换当前会话（如 /load），返回旧会话
    pub async fn replace_session(&self, session: Session) -> Session {
        std::mem::replace(&mut *self.session.lock().await, session)
    }

    pub fn approval_gate(&self) -> &Arc<ApprovalGate> {
        &self.ctx.gate
    }

    pub fn tools(&self) -> &Arc<ToolExecutor> {
        &self.ctx.tools
    }

    pub fn hooks(&self) -> &Arc<HookManager> {
        &self.ctx.hooks
    }

    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.ctx.skills
    }

    /// 激活技能；声明的工具须已在执行器中注册。下一次模型调用起生效
    pub fn activate_skill(&self, id: &str) -> Result<(), SkillError> {
        self.ctx.skills.activate(id, &self.ctx.tools.valid_names())
    }

    pub fn is_busy(&self) -> bool {
        self.active_turn.load(Ordering::Acquire) != 0
    }

    /// 重新读取 DRONE.md 并重建首条 system 消息，返回加载摘要；未配置项目上下文时为 None
    pub async fn reload_project_context(&self) -> Option<String> {
        let (prompt, summary) = {
            let mut guard = self.project.lock().unwrap_or_else(|e| e.into_inner());
            let project = guard.as_mut()?;
            project.reload();
            (
                compose_system_prompt(self.base_prompt.as_deref(), Some(project)),
                project.summary(),
            )
        };
        if let Some(prompt) = prompt {
            self.session.lock().await.set_system_prompt(prompt);
        }
        Some(summary)
    }
}

pub struct AgentBuilder {
    llm: Arc<dyn LlmClient>,
    memory: Option<Arc<dyn MemoryStore>>,
    tools: Option<Arc<ToolExecutor>>,
    gate: Option<Arc<ApprovalGate>>,
    hooks: Option<Arc<HookManager>>,
    skills: Option<Arc<SkillRegistry>>,
    project: Option<ProjectContext>,
    session: Option<Session>,
    system_prompt: Option<String>,
    user_id: String,
    memory_search_limit: usize,
    auto_extract: bool,
    llm_timeout: Duration,
    max_messages: usize,
    sliding_window_size: usize,
}

impl AgentBuilder {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let defaults = Session::default();
        Self {
            llm,
            memory: None,
            tools: None,
            gate: None,
            hooks: None,
            skills: None,
            project: None,
            session: None,
            system_prompt: None,
            user_id: "default".to_string(),
            memory_search_limit: DEFAULT_SEARCH_LIMIT,
            auto_extract: true,
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
            max_messages: defaults.max_messages(),
            sliding_window_size: defaults.sliding_window_size(),
        }
    }

    /// 按配置装配：内存长期记忆、echo/cat/ls 工具、审批模式与风险覆盖、钩子、技能、项目上下文
    pub fn from_config(llm: Arc<dyn LlmClient>, cfg: &AppConfig) -> Self {
        let gate = ApprovalGate::new(cfg.approval.mode);
        for profile in &cfg.approval.profiles {
            gate.register_risk_profile(profile.clone());
        }

        let workspace = cfg.tools.workspace();
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(CatTool::new(&workspace));
        registry.register(LsTool::new(&workspace));

        let tools = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);

        let hooks = HookManager::new();
        if cfg.hooks.log_events {
            hooks.register_logging();
        }

        let skills = if cfg.skills.builtins {
            SkillRegistry::with_builtins()
        } else {
            SkillRegistry::new()
        };
        if let Err(e) = skills.load_from_directory(&cfg.skills.dir) {
            tracing::warn!(error = %e, "failed to load skills directory");
        }
        let available = tools.valid_names();
        for id in &cfg.skills.active {
            if let Err(e) = skills.activate(id, &available) {
                tracing::warn!(skill = %id, error = %e, "skill not activated");
            }
        }

        let mut builder = Self::new(llm)
            .tools(Arc::new(tools))
            .approval_gate(Arc::new(gate))
            .hooks(Arc::new(hooks))
            .skills(Arc::new(skills))
            .window(cfg.agent.max_messages, cfg.agent.sliding_window_size)
            .user_id(cfg.agent.user_id.clone())
            .memory_search_limit(cfg.memory.search_limit)
            .auto_extract(cfg.memory.auto_extract)
            .llm_timeout(Duration::from_secs(cfg.llm.timeout_secs));
        if cfg.memory.enabled {
            builder = builder.memory(Arc::new(InMemoryStore::new(cfg.memory.max_entries)));
        }
        if let Some(prompt) = &cfg.agent.system_prompt {
            builder = builder.system_prompt(prompt.clone());
        }
        if cfg.project.enabled {
            let root = cfg.project.root.clone().unwrap_or(workspace);
            let global = cfg.project.global_file.clone().or_else(default_global_file);
            builder = builder.project_context(ProjectContext::load(root, global));
        }
        builder
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn approval_gate(mut self, gate: Arc<ApprovalGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn hooks(mut self, hooks: Arc<HookManager>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// 项目上下文追加在 system 提示词之后
    pub fn project_context(mut self, project: ProjectContext) -> Self {
        self.project = Some(project);
        self
    }

    /// 使用已有会话（如从磁盘恢复）；此时忽略 window 设置
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn window(mut self, max_messages: usize, sliding_window_size: usize) -> Self {
        self.max_messages = max_messages;
        self.sliding_window_size = sliding_window_size;
        self
    }

    /// 新会话的第一条 system 消息
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn memory_search_limit(mut self, limit: usize) -> Self {
        self.memory_search_limit = limit;
        self
    }

    pub fn auto_extract(mut self, enabled: bool) -> Self {
        self.auto_extract = enabled;
        self
    }

    pub fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn build(self) -> Agent {
        let mut session = self
            .session
            .unwrap_or_else(|| Session::new(self.max_messages, self.sliding_window_size));
        if session.is_empty() {
            if let Some(prompt) = compose_system_prompt(self.system_prompt.as_deref(), self.project.as_ref()) {
                session.add(Message::system(prompt));
            }
        }

        let tools = self
            .tools
            .unwrap_or_else(|| Arc::new(ToolExecutor::new(ToolRegistry::new(), DEFAULT_TOOL_TIMEOUT_SECS)));
        tracing::info!(
            backend = self.llm.name(),
            tools = tools.tool_names().len(),
            memory = self.memory.is_some(),
            project_files = self.project.as_ref().map_or(0, |p| p.files().len()),
            session = %session.id,
            "agent built"
        );

        Agent {
            ctx: Arc::new(TurnContext {
                llm: self.llm,
                memory: self.memory,
                tools,
                gate: self.gate.unwrap_or_default(),
                hooks: self.hooks.unwrap_or_default(),
                skills: self.skills.unwrap_or_default(),
                user_id: self.user_id,
                memory_search_limit: self.memory_search_limit,
                auto_extract: self.auto_extract,
                llm_timeout: self.llm_timeout,
            }),
            session: Arc::new(Mutex::new(session)),
            base_prompt: self.system_prompt,
            project: std::sync::Mutex::new(self.project),
            active_turn: Arc::new(AtomicU64::new(0)),
            turn_counter: AtomicU64::new(0),
        }
    }
}
