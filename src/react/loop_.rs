//! 单轮状态机
//!
//! 严格顺序执行：
//! user_input 钩子 -> 用户消息入会话 -> [压缩] -> 检索记忆 -> 调用模型 ->
//! (无工具调用 -> 完成) | (逐个审批 -> 执行工具 -> 综合调用 -> 完成) -> 异步写入长期记忆
//!
//! 每个外部调用（含钩子）都与取消令牌竞争；令牌触发后不再写会话。
//! 激活技能的提示词只注入出站消息副本，不写入会话。
//! 会话只在某一步完整成功后才追加消息，失败时保留最后一次成功 add 之后的状态。

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ApprovalGate, HookEvent, HookManager};
use crate::llm::{ChatResponse, LlmClient, LlmError, Summarizer};
use crate::memory::{format_memory_context, Exchange, Message, MemoryStore, Session};
use crate::react::{AgentEvent, ToolCallIntent, ToolCallNormalizer};
use crate::skills::SkillRegistry;
use crate::tools::{ToolDefinition, ToolExecutor};

/// 短于此长度（字符）的输入视为寒暄
const MIN_SUBSTANTIVE_CHARS: usize = 5;

const TRIVIAL_INPUTS: [&str; 17] = [
    "hello", "hi", "hey", "hola", "greetings", "thanks", "thank you", "thx", "ty", "bye",
    "goodbye", "ok", "okay", "sure", "what's up", "sup", "how are you",
];

/// 一轮所需的协作方与参数（跨轮共享，只读）
pub struct TurnContext {
    pub llm: Arc<dyn LlmClient>,
    pub memory: Option<Arc<dyn MemoryStore>>,
    pub tools: Arc<ToolExecutor>,
    pub gate: Arc<ApprovalGate>,
    pub hooks: Arc<HookManager>,
    pub skills: Arc<SkillRegistry>,
    pub user_id: String,
    pub memory_search_limit: usize,
    pub auto_extract: bool,
    pub llm_timeout: Duration,
}

/// 寒暄/确认类输入：跳过记忆检索与工具。只做 trim 与小写，标点原样参与比较
pub fn is_trivial(input: &str) -> bool {
    let normalized = input.trim().to_lowercase();
    normalized.chars().count() < MIN_SUBSTANTIVE_CHARS || TRIVIAL_INPUTS.contains(&normalized.as_str())
}

/// 在出站消息副本的最后一条 user 消息后追加记忆上下文
pub fn inject_memory(messages: &mut [Message], memory_context: &str) {
    if memory_context.is_empty() {
        return;
    }
    if let Some(Message::User { content }) = messages.last_mut() {
        *content = format!("{}\n\n[MEMORY CONTEXT]\n{}\n[/MEMORY CONTEXT]", content, memory_context);
    }
}

/// 把激活技能的提示词追加到出站副本的首条 system 消息；没有 system 消息时插入一条
pub fn inject_skills(messages: &mut Vec<Message>, skills_prompt: &str) {
    if skills_prompt.is_empty() {
        return;
    }
    match messages.first_mut() {
        Some(Message::System { content }) => {
            *content = format!("{}\n\n{}", content, skills_prompt);
        }
        _ => messages.insert(0, Message::system(skills_prompt)),
    }
}

fn text_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), AgentError> {
    tx.send(event).await.map_err(|_| AgentError::Cancelled)
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), AgentError> {
    if cancel.is_cancelled() {
        Err(AgentError::Cancelled)
    } else {
        Ok(())
    }
}

/// 与取消令牌竞争；令牌先触发时丢弃 fut
async fn guarded<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, AgentError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        out = fut => Ok(out),
    }
}

async fn chat(
    ctx: &TurnContext,
    messages: &[Message],
    tools: &[ToolDefinition],
    cancel: &CancellationToken,
) -> Result<ChatResponse, AgentError> {
    let call = tokio::time::timeout(ctx.llm_timeout, ctx.llm.chat(messages, tools));
    match guarded(cancel, call).await? {
        Ok(result) => Ok(result?),
        Err(_) => Err(LlmError::Timeout(ctx.llm_timeout.as_secs()).into()),
    }
}

/// 给摘要调用加上超时
struct BoundedSummarizer<'a> {
    llm: &'a dyn LlmClient,
    timeout: Duration,
}

#[async_trait]
impl<'a> Summarizer for BoundedSummarizer<'a> {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        match tokio::time::timeout(self.timeout, self.llm.summarize(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// user_input 钩子可改写输入；被拦截时本轮失败且不写会话
async fn screen_input(ctx: &TurnContext, input: &str, cancel: &CancellationToken) -> Result<String, AgentError> {
    let data = guarded(cancel, ctx.hooks.trigger(HookEvent::UserInput, json!({ "input": input }))).await??;
    Ok(text_field(&data, "input").unwrap_or_else(|| input.to_string()))
}

/// assistant_response 钩子可改写最终文本；被拦截时本轮以 error 结束
async fn screen_response(ctx: &TurnContext, text: String, cancel: &CancellationToken) -> Result<String, AgentError> {
    let data = guarded(cancel, ctx.hooks.trigger(HookEvent::AssistantResponse, json!({ "text": text }))).await??;
    Ok(text_field(&data, "text").unwrap_or(text))
}

/// 观察型事件：拦截只记日志，返回（可能被改写的）数据
async fn notify(ctx: &TurnContext, event: HookEvent, data: Value, cancel: &CancellationToken) -> Result<Value, AgentError> {
    match guarded(cancel, ctx.hooks.trigger(event, data.clone())).await? {
        Ok(out) => Ok(out),
        Err(e) => {
            tracing::warn!(%event, error = %e, "ignoring block on observe-only hook event");
            Ok(data)
        }
    }
}

/// 检索记忆上下文；任何失败都降级为空上下文
async fn lookup_memory(ctx: &TurnContext, memory: &dyn MemoryStore, query: &str) -> String {
    let hits = match memory.search(query, &ctx.user_id, ctx.memory_search_limit).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "memory search failed, continuing without context");
            return String::new();
        }
    };
    if !hits.is_empty() {
        return format_memory_context(&hits);
    }
    match memory.recent(&ctx.user_id, ctx.memory_search_limit).await {
        Ok(recent) => format_memory_context(&recent),
        Err(e) => {
            tracing::warn!(error = %e, "memory recent lookup failed, continuing without context");
            String::new()
        }
    }
}

/// 原生调用按有效工具集过滤；无原生调用时从文本恢复
fn resolve_intents(response: &ChatResponse, valid_names: &HashSet<String>) -> (String, Vec<ToolCallIntent>) {
    if response.tool_calls.is_empty() {
        let recovered = ToolCallNormalizer::recover(&response.content, valid_names);
        return (recovered.content, recovered.tool_calls);
    }
    let intents = response
        .tool_calls
        .iter()
        .filter(|call| {
            let known = valid_names.contains(&call.name);
            if !known {
                tracing::warn!(tool = %call.name, "dropping native call to unknown tool");
            }
            known
        })
        .map(ToolCallIntent::native)
        .collect();
    (response.content.clone(), intents)
}

/// 决策时重新校验工具名：模型调用期间被注销的工具不再审批和执行
fn still_registered(ctx: &TurnContext, intents: Vec<ToolCallIntent>) -> Vec<ToolCallIntent> {
    if intents.is_empty() {
        return intents;
    }
    let current = ctx.tools.valid_names();
    intents
        .into_iter()
        .filter(|intent| {
            let known = current.contains(&intent.name);
            if !known {
                tracing::warn!(tool = %intent.name, "tool unregistered during model call, dropping");
            }
            known
        })
        .collect()
}

/// 执行单个工具并经过 tool_call_before/after/error 钩子；返回记入历史的结果文本。
/// before 钩子改写的参数写回 intent
async fn run_tool(ctx: &TurnContext, intent: &mut ToolCallIntent, cancel: &CancellationToken) -> Result<String, AgentError> {
    let before = json!({ "name": intent.name, "arguments": intent.arguments });
    let outcome = match guarded(cancel, ctx.hooks.trigger(HookEvent::ToolCallBefore, before)).await? {
        Ok(data) => {
            if let Some(arguments) = data.get("arguments") {
                intent.arguments = arguments.clone();
            }
            guarded(cancel, ctx.tools.execute(&intent.name, intent.arguments.clone())).await?
        }
        Err(blocked) => Err(AgentError::from(blocked)),
    };

    match outcome {
        Ok(output) => {
            let after = json!({ "name": intent.name, "arguments": intent.arguments, "result": output.as_str() });
            let data = notify(ctx, HookEvent::ToolCallAfter, after, cancel).await?;
            Ok(text_field(&data, "result").unwrap_or(output))
        }
        Err(e) => {
            let error = e.to_string();
            let data = json!({ "name": intent.name, "arguments": intent.arguments, "error": error.as_str() });
            notify(ctx, HookEvent::ToolCallError, data, cancel).await?;
            Ok(format!("Error: {}", error))
        }
    }
}

/// 执行一轮，返回最终回复文本（可能为空）。终止事件由调用方发出
pub async fn run_turn(
    ctx: &TurnContext,
    session: &mut Session,
    input: &str,
    tx: &mpsc::Sender<AgentEvent>,
    cancel: &CancellationToken,
) -> Result<String, AgentError> {
    ensure_live(cancel)?;
    let input = screen_input(ctx, input, cancel).await?;
    session.add(Message::user(input.clone()));

    if session.needs_compaction() {
        emit(tx, AgentEvent::thinking("Compacting conversation history...")).await?;
        let summarizer = BoundedSummarizer {
            llm: ctx.llm.as_ref(),
            timeout: ctx.llm_timeout,
        };
        guarded(cancel, session.compact(&summarizer)).await?;
    }

    let trivial = is_trivial(&input);
    let mut memory_context = String::new();
    if let Some(memory) = ctx.memory.as_ref().filter(|_| !trivial) {
        emit(tx, AgentEvent::thinking("Checking memories...")).await?;
        memory_context = guarded(cancel, lookup_memory(ctx, memory.as_ref(), &input)).await?;
    }

    let mut outbound = session.get_messages();
    inject_memory(&mut outbound, &memory_context);
    let skills_prompt = ctx.skills.combined_prompt();
    inject_skills(&mut outbound, &skills_prompt);

    let (tools, valid_names) = if trivial {
        (Vec::new(), HashSet::new())
    } else {
        (ctx.tools.definitions(), ctx.tools.valid_names())
    };

    emit(tx, AgentEvent::thinking("Reasoning...")).await?;
    let response = chat(ctx, &outbound, &tools, cancel).await?;
    ensure_live(cancel)?;
    session.update_token_usage(response.usage.total_tokens);

    let (content, intents) = resolve_intents(&response, &valid_names);
    let mut intents = still_registered(ctx, intents);
    tracing::debug!(tool_calls = intents.len(), trivial, "model responded");

    let final_text = if intents.is_empty() {
        let content = screen_response(ctx, content, cancel).await?;
        if !content.is_empty() {
            session.add(Message::assistant(content.clone()));
        }
        content
    } else {
        for intent in &intents {
            emit(tx, AgentEvent::ToolCall { intent: intent.clone() }).await?;
        }
        emit(tx, AgentEvent::thinking("Executing tools...")).await?;

        let mut tool_messages = Vec::with_capacity(intents.len());
        for intent in intents.iter_mut() {
            let decision = ctx.gate.decide(&intent.name, &intent.arguments);
            if decision.needs_approval {
                emit(
                    tx,
                    AgentEvent::ApprovalNeeded {
                        name: intent.name.clone(),
                        arguments: intent.arguments.clone(),
                        risk: decision.risk,
                        reason: decision.reason,
                    },
                )
                .await?;
            }

            let result = run_tool(ctx, intent, cancel).await?;
            emit(
                tx,
                AgentEvent::ToolResult {
                    name: intent.name.clone(),
                    result: result.clone(),
                },
            )
            .await?;
            tool_messages.push(Message::tool(intent.id.clone(), intent.name.clone(), result));
        }

        ensure_live(cancel)?;
        let requests = intents.iter().map(ToolCallIntent::to_request).collect();
        session.add(Message::assistant_with_tools(content, requests));
        for message in tool_messages {
            session.add(message);
        }

        emit(tx, AgentEvent::thinking("Synthesizing results...")).await?;
        let mut outbound = session.get_messages();
        inject_skills(&mut outbound, &skills_prompt);
        let follow_up = chat(ctx, &outbound, &tools, cancel).await?;
        ensure_live(cancel)?;
        session.update_token_usage(follow_up.usage.total_tokens);

        let cleaned = ToolCallNormalizer::recover(&follow_up.content, &HashSet::new()).content;
        let cleaned = screen_response(ctx, cleaned, cancel).await?;
        if !cleaned.is_empty() {
            session.add(Message::assistant(cleaned.clone()));
        }
        cleaned
    };

    if let Some(memory) = ctx.memory.clone().filter(|_| ctx.auto_extract && !final_text.is_empty()) {
        let user_id = ctx.user_id.clone();
        let exchange = Exchange::new(input.clone(), final_text.clone());
        tokio::spawn(async move {
            if let Err(e) = memory.store(&user_id, exchange).await {
                tracing::warn!(error = %e, "failed to store exchange in memory");
            }
        });
    }

    Ok(final_text)
}
