//! 核心控制层：错误类型、工具审批闸门、生命周期钩子与项目上下文

pub mod approval;
pub mod error;
pub mod hooks;
pub mod project_context;

pub use approval::{
    default_risk_profiles, ApprovalDecision, ApprovalGate, ApprovalMode, RiskLevel,
    ToolRiskProfile,
};
pub use error::AgentError;
pub use hooks::{Hook, HookError, HookEvent, HookInfo, HookManager, HookResult, LoggingHook};
pub use project_context::{ContextFile, ContextScope, ProjectContext};
