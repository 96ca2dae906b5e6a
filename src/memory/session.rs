//! 会话：有界消息历史 + 摘要压缩 + token 计数
//!
//! 消息数超过 max_messages 时由调用方触发 compact：
//! system 消息全部保留、最近 sliding_window_size 条非 system 消息原样保留，
//! 其余（middle）交给 Summarizer 压成一条 "[Previous Context Summary]: ..." system 消息。
//! 摘要失败时退化为 system + recent，不向上抛错。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::Summarizer;
use crate::memory::{Message, Role};

pub const DEFAULT_MAX_MESSAGES: usize = 50;
pub const DEFAULT_SLIDING_WINDOW: usize = 20;

const SUMMARY_PROMPT_HEADER: &str =
    "Summarize the following conversation events concisely to preserve context:\n\n";
const SUMMARY_PREFIX: &str = "[Previous Context Summary]: ";

/// 一次压缩的结果形态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// middle 为空，仅重排为 system + recent
    Trimmed,
    /// middle 被替换为一条摘要消息
    Summarized,
    /// 摘要失败或为空，退化为 system + recent
    Fallback,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: Vec<Message>,
    max_messages: usize,
    sliding_window_size: usize,
    #[serde(default)]
    pub total_tokens_used: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES, DEFAULT_SLIDING_WINDOW)
    }
}

impl Session {
    pub fn new(max_messages: usize, sliding_window_size: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            max_messages,
            sliding_window_size,
            total_tokens_used: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn sliding_window_size(&self) -> usize {
        self.sliding_window_size
    }

    pub fn needs_compaction(&self) -> bool {
        self.messages.len() > self.max_messages
    }

    /// 消息副本（调用方修改不影响会话内部）
    pub fn get_messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn update_token_usage(&mut self, tokens: u64) {
        self.total_tokens_used = self.total_tokens_used.saturating_add(tokens);
    }

    /// 替换首条 system 消息（无则插入到最前）；压缩摘要等其余 system 消息不动
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        match self.messages.first_mut() {
            Some(Message::System { content }) => *content = prompt,
            _ => self.messages.insert(0, Message::system(prompt)),
        }
        self.updated_at = Utc::now();
    }

    /// 清空非 system 消息并重置 token 计数
    pub fn clear(&mut self) {
        self.messages.retain(Message::is_system);
        self.total_tokens_used = 0;
        self.updated_at = Utc::now();
    }

    /// 拆成 (system, middle, recent)，recent 为最后 sliding_window_size 条非 system 消息
    fn partition(&self) -> (Vec<Message>, Vec<Message>, Vec<Message>) {
        let (system, rest): (Vec<Message>, Vec<Message>) =
            self.messages.iter().cloned().partition(Message::is_system);
        let split = rest.len().saturating_sub(self.sliding_window_size);
        let mut middle = rest;
        let recent = middle.split_off(split);
        (system, middle, recent)
    }

    fn summary_prompt(middle: &[Message]) -> String {
        let lines: Vec<String> = middle
            .iter()
            .map(|m| format!("{}: {}", m.role(), m.content()))
            .collect();
        format!("{}{}", SUMMARY_PROMPT_HEADER, lines.join("\n"))
    }

    /// 压缩历史。提示词在任何修改之前构建，await 被取消时会话保持原样
    pub async fn compact<S>(&mut self, summarizer: &S) -> CompactionOutcome
    where
        S: Summarizer + ?Sized,
    {
        let (system, middle, recent) = self.partition();
        let before = self.messages.len();

        if middle.is_empty() {
            self.messages = system.into_iter().chain(recent).collect();
            return CompactionOutcome::Trimmed;
        }

        let prompt = Self::summary_prompt(&middle);
        let outcome = match summarizer.summarize(&prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                let summary = Message::system(format!("{}{}", SUMMARY_PREFIX, text.trim()));
                self.messages = system
                    .into_iter()
                    .chain(std::iter::once(summary))
                    .chain(recent)
                    .collect();
                CompactionOutcome::Summarized
            }
            Ok(_) => {
                tracing::warn!("summarizer returned empty text, dropping middle history");
                self.messages = system.into_iter().chain(recent).collect();
                CompactionOutcome::Fallback
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed, dropping middle history");
                self.messages = system.into_iter().chain(recent).collect();
                CompactionOutcome::Fallback
            }
        };
        self.updated_at = Utc::now();
        tracing::info!(
            session = %self.id,
            before,
            after = self.messages.len(),
            ?outcome,
            "session compacted"
        );
        outcome
    }

    /// 简短状态行：短 id、名称、消息数、token
    pub fn context_summary(&self) -> String {
        let short_id: String = self.id.chars().take(8).collect();
        let name = self.name.as_deref().unwrap_or("unnamed");
        format!(
            "Session {} ({}) | {} messages | {} tokens used",
            short_id,
            name,
            self.messages.len(),
            self.total_tokens_used
        )
    }

    /// 导出 markdown 对话记录
    pub fn export_transcript(&self, include_system: bool) -> String {
        let mut out = vec![
            format!("# Session {}", self.name.as_deref().unwrap_or(&self.id)),
            String::new(),
            format!("- id: {}", self.id),
            format!("- created: {}", self.created_at.to_rfc3339()),
            format!("- updated: {}", self.updated_at.to_rfc3339()),
            format!("- messages: {}", self.messages.len()),
            format!("- tokens used: {}", self.total_tokens_used),
            String::new(),
        ];
        for message in &self.messages {
            let heading = match message {
                Message::System { .. } if !include_system => continue,
                Message::System { .. } => "System".to_string(),
                Message::User { .. } => "User".to_string(),
                Message::Assistant { .. } => "Assistant".to_string(),
                Message::Tool { name, .. } => format!("Tool ({})", name),
            };
            out.push(format!("### {}", heading));
            out.push(String::new());
            out.push(message.content().to_string());
            for call in message.tool_calls() {
                out.push(format!("- tool call `{}`: {}", call.name, call.arguments));
            }
            out.push(String::new());
        }
        out.join("\n")
    }

    /// 统计某角色消息数
    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role() == role).count()
    }
}
