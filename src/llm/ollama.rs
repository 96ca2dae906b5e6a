//! Ollama 本地模型客户端
//!
//! 通过 reqwest 调用 /api/chat 与 /api/generate。本地小模型常不走原生 function calling，
//! 而是把工具调用写进正文 JSON，这部分由 react::normalizer 在 Agent 侧恢复。

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::llm::{ChatResponse, LlmClient, LlmError, Summarizer, TokenUsage};
use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolDefinition;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama 客户端：持有 HTTP Client、地址与模型名
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, model: &str, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            timeout_secs,
        }
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<Value, LlmError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    LlmError::Unavailable(e.to_string())
                } else {
                    LlmError::Http(e.to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Http(format!("{}: {}", status, text)));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

/// Message -> Ollama 消息 JSON
fn to_ollama_message(msg: &Message) -> Value {
    match msg {
        Message::System { content } => json!({ "role": "system", "content": content }),
        Message::User { content } => json!({ "role": "user", "content": content }),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut v = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                v["tool_calls"] = tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments },
                        })
                    })
                    .collect();
            }
            v
        }
        Message::Tool {
            tool_call_id,
            name,
            content,
        } => json!({
            "role": "tool",
            "content": content,
            "tool_call_id": tool_call_id,
            "tool_name": name,
        }),
    }
}

fn to_ollama_tool(def: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

/// 解析 /api/chat 返回：正文、原生 tool_calls、token 统计
fn parse_chat_response(body: &Value) -> Result<ChatResponse, LlmError> {
    let message = body
        .get("message")
        .ok_or_else(|| LlmError::InvalidResponse("missing `message`".to_string()))?;
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let id = tc
                        .get("id")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| format!("call_{}", name));
                    Some(ToolCallRequest {
                        id,
                        name,
                        arguments: func.get("arguments").cloned().unwrap_or_else(|| json!({})),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let prompt = body.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0);
    let completion = body.get("eval_count").and_then(Value::as_u64).unwrap_or(0);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage: TokenUsage::new(prompt, completion),
    })
}

#[async_trait]
impl Summarizer for OllamaClient {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        let body = json!({ "model": self.model, "prompt": prompt, "stream": false });
        let resp = self.post("/api/generate", &body).await?;
        Ok(resp
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "ollama chat"
        );
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(to_ollama_message).collect(),
            tools: tools.iter().map(to_ollama_tool).collect(),
            stream: false,
        };
        let body = self.post("/api/chat", &request).await?;
        parse_chat_response(&body)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_native_tool_calls_and_usage() {
        let body = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    { "function": { "name": "ls", "arguments": { "path": "src" } } }
                ]
            },
            "prompt_eval_count": 12,
            "eval_count": 3
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "ls");
        assert_eq!(resp.tool_calls[0].id, "call_ls");
        assert_eq!(resp.tool_calls[0].arguments["path"], "src");
        assert_eq!(resp.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_plain_content() {
        let body = json!({ "message": { "role": "assistant", "content": "Hello!" } });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "Hello!");
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_missing_message_is_error() {
        let err = parse_chat_response(&json!({ "error": "model not found" })).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let v = to_ollama_message(&Message::tool("call_1", "cat", "file body"));
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_1");
        assert_eq!(v["tool_name"], "cat");
    }
}
