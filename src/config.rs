//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DRONE__*` 覆盖（双下划线表示嵌套，如 `DRONE__LLM__PROVIDER=ollama`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::{ApprovalMode, ToolRiskProfile};

/// 应用配置根（对应 config/default.toml 的顶层）；Default 总是合法配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub memory: MemorySection,
    pub approval: ApprovalSection,
    pub tools: ToolsSection,
    pub session: SessionSection,
    pub hooks: HooksSection,
    pub skills: SkillsSection,
    pub project: ProjectSection,
}

/// [agent] 段：会话窗口、系统提示词、用户 ID
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 超过此消息数触发压缩
    pub max_messages: usize,
    /// 压缩时原样保留的最近非 system 消息数
    pub sliding_window_size: usize,
    pub system_prompt: Option<String>,
    /// 长期记忆按此 ID 隔离
    pub user_id: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_messages: 50,
            sliding_window_size: 20,
            system_prompt: None,
            user_id: "default".to_string(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：mock / ollama
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次模型调用超时（秒）
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "llama3.1".to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }
}

/// [memory] 段：长期记忆
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub enabled: bool,
    pub search_limit: usize,
    /// 每轮结束后异步写入 (用户输入, 回复)
    pub auto_extract: bool,
    pub max_entries: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            search_limit: 5,
            auto_extract: true,
            max_entries: 1000,
        }
    }
}

/// [approval] 段：审批模式与工具风险覆盖
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApprovalSection {
    pub mode: ApprovalMode,
    /// 覆盖或新增的工具风险画像，如 `{ tool = "cat", risk = "high" }`
    pub profiles: Vec<ToolRiskProfile>,
}

/// [tools] 段：沙箱根目录与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 沙箱根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            tool_timeout_secs: 30,
        }
    }
}

impl ToolsSection {
    pub fn workspace(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

/// [session] 段：会话文件目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub dir: PathBuf,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".drone_sessions"),
        }
    }
}

/// [hooks] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HooksSection {
    /// 为所有生命周期事件挂上日志钩子
    pub log_events: bool,
}

/// [skills] 段：技能目录与启动时激活的技能
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SkillsSection {
    pub dir: PathBuf,
    /// 预置 git_expert / code_review
    pub builtins: bool,
    pub active: Vec<String>,
}

impl Default for SkillsSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("config/skills"),
            builtins: true,
            active: Vec::new(),
        }
    }
}

/// [project] 段：DRONE.md 项目上下文
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    pub enabled: bool,
    /// 项目根，未设置时用 [tools] 的沙箱根目录
    pub root: Option<PathBuf>,
    /// 全局文件，未设置时用 ~/.drone/DRONE.md
    pub global_file: Option<PathBuf>,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
            global_file: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 DRONE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DRONE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DRONE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
