//! Agent 错误类型
//!
//! 外部协作方失败（LLM、记忆、工具）在轮次边界被捕获并降级；
//! TurnInProgress 属于调用约定违规，由 Agent::step 立即返回给调用方。

use thiserror::Error;

use crate::core::HookError;
use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 上一轮的事件流尚未结束又调用了 step
    #[error("A turn is already in progress for this session")]
    TurnInProgress,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    /// 钩子拦截了输入、工具调用或回复
    #[error(transparent)]
    Hook(#[from] HookError),

    /// 协作方在轮次内 panic；消息为 panic 载荷
    #[error("Turn aborted by panic: {0}")]
    TurnPanicked(String),

    /// 调用方放弃了事件流
    #[error("Turn cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 穷尽匹配：变体增删时须同步
    fn kind(e: &AgentError) -> &'static str {
        match e {
            AgentError::TurnInProgress => "turn_in_progress",
            AgentError::Llm(_) => "llm",
            AgentError::UnknownTool(_) => "unknown_tool",
            AgentError::ToolExecutionFailed(_) => "tool_failed",
            AgentError::ToolTimeout(_) => "tool_timeout",
            AgentError::PathEscape(_) => "path_escape",
            AgentError::Hook(_) => "hook",
            AgentError::TurnPanicked(_) => "panicked",
            AgentError::Cancelled => "cancelled",
        }
    }

    #[test]
    fn test_display_messages() {
        let blocked: AgentError = HookError::Blocked("no shell".into()).into();
        assert_eq!(kind(&blocked), "hook");
        assert_eq!(blocked.to_string(), "Blocked by hook: no shell");

        let panicked = AgentError::TurnPanicked("boom".into());
        assert_eq!(kind(&panicked), "panicked");
        assert_eq!(panicked.to_string(), "Turn aborted by panic: boom");

        let llm: AgentError = LlmError::Timeout(5).into();
        assert_eq!(kind(&llm), "llm");
        assert_eq!(kind(&AgentError::TurnInProgress), "turn_in_progress");
    }
}
