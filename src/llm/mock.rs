//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置的 ChatResponse；预置用尽后回显最后一条 User 消息。
//! 记录每次 chat 收到的消息与工具列表，便于断言记忆注入与工具开放情况。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{ChatResponse, LlmClient, LlmError, Summarizer};
use crate::memory::Message;
use crate::tools::ToolDefinition;

/// 一次 chat 调用的记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// Mock 客户端：脚本化回复 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    summary: Mutex<Option<Result<String, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    summarize_prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条预置回复
    pub fn with_response(self, response: ChatResponse) -> Self {
        lock(&self.script).push_back(Ok(response));
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_response(ChatResponse::text(text))
    }

    /// 追加一次失败
    pub fn with_error(self, err: LlmError) -> Self {
        lock(&self.script).push_back(Err(err));
        self
    }

    /// summarize 的固定返回
    pub fn with_summary(self, summary: Result<String, LlmError>) -> Self {
        *lock(&self.summary) = Some(summary);
        self
    }

    /// 每次 chat 前等待，用于超时与取消测试
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn summarize_prompts(&self) -> Vec<String> {
        lock(&self.summarize_prompts).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Summarizer for MockLlmClient {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        lock(&self.summarize_prompts).push(prompt.to_string());
        lock(&self.summary)
            .clone()
            .unwrap_or_else(|| Ok("Earlier conversation summarized.".to_string()))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        lock(&self.calls).push(RecordedCall {
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.script).pop_front();
        if let Some(next) = scripted {
            return next;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m, Message::User { .. }))
            .map(|m| m.content())
            .unwrap_or("(no input)");
        Ok(ChatResponse::text(format!("Echo from Mock: {}", last_user)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
