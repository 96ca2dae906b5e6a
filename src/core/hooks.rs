//! 生命周期钩子
//!
//! HookManager 按事件保存回调，触发时按 priority 升序（同优先级按注册顺序）依次调用。
//! 每个回调拿到当前数据的副本，可返回新数据替换之（链式传递给下一个回调），
//! 也可返回 HookError::Blocked 拦截本次动作；其余失败只记日志，不影响后续回调。
//!
//! 数据形状（JSON 对象）：
//! - user_input: `{"input"}`，可改写 input
//! - tool_call_before: `{"name", "arguments"}`，可改写 arguments，Blocked 则不执行该工具
//! - tool_call_after: `{"name", "arguments", "result"}`，可改写 result
//! - tool_call_error: `{"name", "arguments", "error"}`
//! - assistant_response: `{"text"}`，可改写 text，Blocked 则本轮以 error 结束
//! - error: `{"message"}`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 可挂载的生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    UserInput,
    AssistantResponse,
    ToolCallBefore,
    ToolCallAfter,
    ToolCallError,
    Error,
}

impl HookEvent {
    pub const ALL: [HookEvent; 6] = [
        HookEvent::UserInput,
        HookEvent::AssistantResponse,
        HookEvent::ToolCallBefore,
        HookEvent::ToolCallAfter,
        HookEvent::ToolCallError,
        HookEvent::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::UserInput => "user_input",
            HookEvent::AssistantResponse => "assistant_response",
            HookEvent::ToolCallBefore => "tool_call_before",
            HookEvent::ToolCallAfter => "tool_call_after",
            HookEvent::ToolCallError => "tool_call_error",
            HookEvent::Error => "error",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HookError {
    /// 拦截当前动作；会传播给触发方
    #[error("Blocked by hook: {0}")]
    Blocked(String),

    #[error("Hook failed: {0}")]
    Failed(String),
}

/// 回调返回 None 表示数据不变
pub type HookResult = Result<Option<Value>, HookError>;

#[async_trait]
pub trait Hook: Send + Sync {
    async fn on_event(&self, event: HookEvent, data: Value) -> HookResult;
}

/// 注册信息（不含回调本身）
#[derive(Debug, Clone, PartialEq)]
pub struct HookInfo {
    pub id: u64,
    pub name: String,
    pub event: HookEvent,
    pub priority: i32,
    pub enabled: bool,
}

struct Registered {
    info: HookInfo,
    hook: Arc<dyn Hook>,
}

pub const DEFAULT_PRIORITY: i32 = 100;

/// 钩子管理器；作为显式对象经 AgentBuilder 传入，轮次之间可增删
#[derive(Default)]
pub struct HookManager {
    hooks: RwLock<Vec<Registered>>,
    next_id: AtomicU64,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调，返回 ID；priority 越小越早执行
    pub fn register(
        &self,
        event: HookEvent,
        name: impl Into<String>,
        priority: i32,
        hook: impl Hook + 'static,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut name = name.into();
        if name.is_empty() {
            name = format!("hook_{}_{}", event, id);
        }
        tracing::debug!(hook = %name, %event, priority, "hook registered");

        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        hooks.push(Registered {
            info: HookInfo {
                id,
                name,
                event,
                priority,
                enabled: true,
            },
            hook: Arc::new(hook),
        });
        // 稳定排序：同优先级保持注册顺序
        hooks.sort_by_key(|r| r.info.priority);
        id
    }

    pub fn unregister(&self, id: u64) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        let before = hooks.len();
        hooks.retain(|r| r.info.id != id);
        hooks.len() != before
    }

    /// 按名称移除，返回移除数量
    pub fn unregister_by_name(&self, name: &str) -> usize {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        let before = hooks.len();
        hooks.retain(|r| r.info.name != name);
        before - hooks.len()
    }

    pub fn set_enabled(&self, id: u64, enabled: bool) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        match hooks.iter_mut().find(|r| r.info.id == id) {
            Some(r) => {
                r.info.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// 按执行顺序列出；event 为 None 时列出全部
    pub fn hooks(&self, event: Option<HookEvent>) -> Vec<HookInfo> {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| event.map_or(true, |ev| r.info.event == ev))
            .map(|r| r.info.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    pub fn clear(&self) {
        self.hooks.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// 触发事件，返回（可能被改写的）数据。只有 Blocked 会返回 Err
    pub async fn trigger(&self, event: HookEvent, data: Value) -> Result<Value, HookError> {
        let chain: Vec<(String, Arc<dyn Hook>)> = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.info.event == event && r.info.enabled)
            .map(|r| (r.info.name.clone(), r.hook.clone()))
            .collect();

        let mut data = data;
        for (name, hook) in chain {
            match hook.on_event(event, data.clone()).await {
                Ok(Some(next)) => data = next,
                Ok(None) => {}
                Err(HookError::Blocked(reason)) => {
                    tracing::info!(hook = %name, %event, reason = %reason, "action blocked by hook");
                    return Err(HookError::Blocked(reason));
                }
                Err(e) => tracing::error!(hook = %name, %event, error = %e, "hook failed"),
            }
        }
        Ok(data)
    }
}

/// 把事件写进日志的观察型钩子
pub struct LoggingHook;

#[async_trait]
impl Hook for LoggingHook {
    async fn on_event(&self, event: HookEvent, data: Value) -> HookResult {
        tracing::info!(%event, data = %data, "hook event");
        Ok(None)
    }
}

impl HookManager {
    /// 为所有事件挂上 LoggingHook
    pub fn register_logging(&self) {
        for event in HookEvent::ALL {
            self.register(event, format!("logger_{}", event), DEFAULT_PRIORITY, LoggingHook);
        }
    }
}
