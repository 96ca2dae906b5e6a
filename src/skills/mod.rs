//! 技能系统
//!
//! 技能（Skill）打包一段提示词及其依赖（其他技能、工具）。激活后提示词随每次模型调用注入。
//!
//! 目录结构：
//! ```text
//! config/skills/
//! ├── rust_style/
//! │   ├── skill.toml      # 技能元数据（[skill] 表）
//! │   └── prompt.md       # 注入 system 提示词的内容
//! └── ...
//! ```

mod loader;
mod registry;

pub use loader::{load_dir, Skill, SkillMeta};
pub use registry::{builtin_skills, SkillError, SkillInfo, SkillRegistry};
