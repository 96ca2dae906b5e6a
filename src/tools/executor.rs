//! 工具执行器
//!
//! 持有 ToolRegistry（读写锁，允许轮次之间增删工具）与全局超时。execute(tool_name, args) 在超时内调用工具，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed / UnknownTool）；每次调用输出结构化审计日志（JSON）。

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolDefinition, ToolRegistry};

const ARGS_PREVIEW_CHARS: usize = 200;

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: RwLock<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: RwLock::new(registry),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ToolRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ToolRegistry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 执行指定工具；工具不存在返回 UnknownTool，超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        let tool = self
            .get_tool(tool_name)
            .ok_or_else(|| AgentError::UnknownTool(tool_name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn register(&self, tool: impl Tool + 'static) {
        self.write().register(tool);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.write().unregister(name)
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read().get(name)
    }

    /// 当前可调用的工具名集合（决策时刻的快照）
    pub fn valid_names(&self) -> HashSet<String> {
        self.read().valid_names()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.read().tool_names()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.read().definitions()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
