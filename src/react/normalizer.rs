//! 从模型自由文本中恢复工具调用
//!
//! 后端不支持原生 function calling 时，模型会把调用意图写成内联 JSON。
//! 恢复规则偏保守：宁可漏掉一次调用，也不执行一次错误的调用。
//! - 优先在 ```json 围栏内查找，否则查找全文
//! - 用括号深度计数（跳过字符串字面量）取第一个平衡的 {...} 片段
//! - 解析失败或结构不符：原文原样返回，无工具调用
//! - name 为空 / "none" 或不在有效工具集中：视为伪调用，
//!   依次取 arguments.message / response / content / text 替换片段，取不到则删除片段

use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::ToolCallRequest;

static JSON_FENCE_RE: OnceLock<Regex> = OnceLock::new();

/// 伪调用中承载真实回复的字段，按优先级
const MESSAGE_KEYS: [&str; 4] = ["message", "response", "content", "text"];

/// 工具调用来源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// 后端原生 tool_calls
    Native,
    /// 从文本中恢复
    Recovered,
}

/// 待执行的工具调用意图
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolCallIntent {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub provenance: Provenance,
}

impl ToolCallIntent {
    pub fn native(call: &ToolCallRequest) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            provenance: Provenance::Native,
        }
    }

    fn recovered(name: &str, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.to_string(),
            arguments,
            provenance: Provenance::Recovered,
        }
    }

    pub fn to_request(&self) -> ToolCallRequest {
        ToolCallRequest {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// 恢复结果：清理后的文本 + 恢复出的调用
#[derive(Clone, Debug, PartialEq)]
pub struct Recovered {
    pub content: String,
    pub tool_calls: Vec<ToolCallIntent>,
}

impl Recovered {
    fn passthrough(text: &str) -> Self {
        Self {
            content: text.to_string(),
            tool_calls: Vec::new(),
        }
    }
}

pub struct ToolCallNormalizer;

impl ToolCallNormalizer {
    /// 从文本恢复工具调用；永不失败，任何歧义都按普通文本处理
    pub fn recover(text: &str, valid_names: &HashSet<String>) -> Recovered {
        let Some((replace, span)) = locate(text) else {
            return Recovered::passthrough(text);
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&text[span]) else {
            return Recovered::passthrough(text);
        };
        let candidates = candidates(&parsed);
        if candidates.is_empty() {
            return Recovered::passthrough(text);
        }

        let mut tool_calls = Vec::new();
        let mut replacement: Option<String> = None;
        for candidate in candidates {
            let name = candidate_name(candidate);
            let arguments = candidate.get("arguments").cloned().unwrap_or(Value::Null);
            match name {
                Some(name) if valid_names.contains(name) => {
                    tool_calls.push(ToolCallIntent::recovered(name, arguments));
                }
                _ => {
                    tracing::debug!(name = ?name, "discarding fake or unknown tool call");
                    if replacement.is_none() {
                        replacement = extract_message(&arguments);
                    }
                }
            }
        }

        let mut content = String::with_capacity(text.len());
        content.push_str(&text[..replace.start]);
        content.push_str(replacement.as_deref().unwrap_or(""));
        content.push_str(&text[replace.end..]);
        Recovered {
            content: content.trim().to_string(),
            tool_calls,
        }
    }
}

/// 返回 (需替换的范围, 待解析的 JSON 范围)，均为相对原文的字节偏移
fn locate(text: &str) -> Option<(Range<usize>, Range<usize>)> {
    let fence = JSON_FENCE_RE.get_or_init(|| {
        Regex::new(r"(?is)```json\s*(.*?)```").expect("static regex is valid")
    });
    if let Some(caps) = fence.captures(text) {
        if let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) {
            if let Some(span) = balanced_span(inner.as_str()) {
                let start = inner.start() + span.start;
                return Some((whole.range(), start..inner.start() + span.end));
            }
        }
    }
    balanced_span(text).map(|span| (span.clone(), span))
}

/// 第一个平衡片段。以 '[' 开头且该片段是合法 JSON 时取整个数组，否则取第一个 '{'
fn balanced_span(text: &str) -> Option<Range<usize>> {
    let lead = text.len() - text.trim_start().len();
    if text[lead..].starts_with('[') {
        if let Some(span) = scan_from(text, lead) {
            if serde_json::from_str::<Value>(&text[span.clone()]).is_ok() {
                return Some(span);
            }
        }
    }
    scan_from(text, text.find('{')?)
}

/// 从 start 处的括号开始做字符串感知的深度扫描，返回到配对括号为止的范围
fn scan_from(text: &str, start: usize) -> Option<Range<usize>> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start..start + i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn is_candidate(value: &Value) -> bool {
    value
        .as_object()
        .map_or(false, |o| o.contains_key("name") && o.contains_key("arguments"))
}

fn candidates(parsed: &Value) -> Vec<&Value> {
    match parsed {
        Value::Array(items) => items.iter().filter(|v| is_candidate(v)).collect(),
        v if is_candidate(v) => vec![v],
        _ => Vec::new(),
    }
}

/// 真实工具名；空串、"none"、null 与非字符串视为伪调用
fn candidate_name(candidate: &Value) -> Option<&str> {
    let name = candidate.get("name")?.as_str()?.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(name)
    }
}

fn extract_message(arguments: &Value) -> Option<String> {
    MESSAGE_KEYS.iter().find_map(|key| {
        arguments
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}
