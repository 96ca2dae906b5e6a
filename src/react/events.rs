//! 单轮过程事件：按发出顺序流向展示层，每轮恰好以一个 response 或 error 结束

use serde::Serialize;
use serde_json::Value;

use crate::core::RiskLevel;
use crate::react::ToolCallIntent;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 进度提示（压缩、检索记忆、推理、执行工具、综合结果）
    Thinking { text: String },
    /// 即将执行的工具调用
    ToolCall { intent: ToolCallIntent },
    /// 工具返回（成功结果或 "Error: ..."）
    ToolResult { name: String, result: String },
    /// 需要操作员确认（当前不阻塞执行）
    ApprovalNeeded {
        name: String,
        arguments: Value,
        risk: RiskLevel,
        reason: String,
    },
    /// 最终回复
    Response { text: String },
    /// 本轮失败
    Error { message: String },
}

impl AgentEvent {
    pub fn thinking(text: impl Into<String>) -> Self {
        AgentEvent::Thinking { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Response { .. } | AgentEvent::Error { .. })
    }

    /// 事件类型名，与 JSON 中的 "type" 字段一致
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::ApprovalNeeded { .. } => "approval_needed",
            AgentEvent::Response { .. } => "response",
            AgentEvent::Error { .. } => "error",
        }
    }
}
