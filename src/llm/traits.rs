//! LLM 后端抽象
//!
//! 所有后端（Ollama / Mock）实现 LlmClient：chat（消息 + 工具 schema -> 文本与工具调用）
//! 以及 Summarizer::summarize（会话压缩时生成摘要）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolDefinition;

/// 后端调用失败（均为可恢复错误，由 Agent 转为 error 事件或降级处理）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// 单次调用的 token 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// chat 的标准化返回：文本、原生工具调用（可为空）、token 统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// 摘要能力：Session 压缩只依赖这一项
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError>;
}

/// LLM 客户端 trait。tools 为空表示本轮不开放工具（原生函数调用关闭）
#[async_trait]
pub trait LlmClient: Summarizer {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError>;

    /// 后端名称，用于日志
    fn name(&self) -> &str {
        "llm"
    }
}
