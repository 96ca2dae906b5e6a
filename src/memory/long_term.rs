//! 长期记忆：跨会话检索的外部协作方
//!
//! MemoryStore 支持 search / store / recent；InMemoryStore 按用户隔离，
//! 以关键词重叠打分（无真实向量），超出 max_entries 时丢弃最旧条目。

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    #[error("Memory store unavailable: {0}")]
    Unavailable(String),

    #[error("Memory store error: {0}")]
    Backend(String),
}

/// 一条检索结果
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnippet {
    pub text: String,
    pub score: f32,
}

impl MemorySnippet {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// 一轮完整交互（用户输入 + 最终回复），写入长期记忆
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

impl Exchange {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("User: {}\nAssistant: {}", self.user, self.assistant)
    }
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 按查询检索最相关的 limit 条
    async fn search(&self, query: &str, user_id: &str, limit: usize) -> Result<Vec<MemorySnippet>, MemoryError>;

    /// 存入一轮交互
    async fn store(&self, user_id: &str, exchange: Exchange) -> Result<(), MemoryError>;

    /// 最近的 limit 条（检索为空时的回落）
    async fn recent(&self, _user_id: &str, _limit: usize) -> Result<Vec<MemorySnippet>, MemoryError> {
        Ok(Vec::new())
    }
}

/// 渲染注入用的记忆上下文，每条一行 "- <text>"
pub fn format_memory_context(snippets: &[MemorySnippet]) -> String {
    snippets
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("- {}", t))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

struct Entry {
    text: String,
    tokens: HashSet<String>,
}

/// 进程内实现：按 user_id 分桶
pub struct InMemoryStore {
    users: RwLock<HashMap<String, Vec<Entry>>>,
    max_entries: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl InMemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// 直接写入一段文本
    pub fn add_text(&self, user_id: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        let entries = users.entry(user_id.to_string()).or_default();
        entries.push(Entry {
            text: text.to_string(),
            tokens: tokenize_lower(text),
        });
        let n = entries.len();
        if n > self.max_entries {
            entries.drain(0..n - self.max_entries);
        }
    }

    pub fn len(&self, user_id: &str) -> usize {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.get(user_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(&self, query: &str, user_id: &str, limit: usize) -> Result<Vec<MemorySnippet>, MemoryError> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = users.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(usize, usize, &Entry)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (query_tokens.intersection(&e.tokens).count(), i, e))
            .filter(|(s, _, _)| *s > 0)
            .collect();
        // 同分时较新的排前
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(s, _, e)| MemorySnippet::new(e.text.clone(), s as f32 / query_tokens.len() as f32))
            .collect())
    }

    async fn store(&self, user_id: &str, exchange: Exchange) -> Result<(), MemoryError> {
        self.add_text(user_id, &exchange.render());
        Ok(())
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<MemorySnippet>, MemoryError> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        Ok(users
            .get(user_id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|e| MemorySnippet::new(e.text.clone(), 0.0))
                    .collect()
            })
            .unwrap_or_default())
    }
}
