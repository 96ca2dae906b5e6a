//! Drone - 编码智能体控制平面
//!
//! 模块划分：
//! - **agent**: Agent 门面（构建、单轮事件流、重入保护、取消）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、工具审批闸门、生命周期钩子、项目上下文（DRONE.md）
//! - **llm**: LLM 后端抽象与实现（Ollama / Mock）
//! - **memory**: 消息模型、会话压缩、会话持久化、长期记忆
//! - **observability**: 日志初始化
//! - **react**: 工具调用恢复、过程事件、单轮状态机
//! - **skills**: 技能注册表与 skill.toml 加载
//! - **tools**: 工具箱（echo、cat、ls）与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod skills;
pub mod tools;

pub use agent::{Agent, AgentBuilder, TurnStream};
pub use react::AgentEvent;
