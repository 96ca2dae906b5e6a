//! 技能注册表
//!
//! 注册、激活、停用技能；激活中的技能按激活顺序拼接为 system 提示词段落。

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use super::loader::{self, Skill, SkillMeta};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkillError {
    #[error("Skill not found: {0}")]
    NotFound(String),

    #[error("Skill {skill} requires {dependency} to be active")]
    MissingDependency { skill: String, dependency: String },

    #[error("Skill {skill} requires tool {tool}, which is not registered")]
    MissingTool { skill: String, tool: String },

    #[error("Failed to read skills directory: {0}")]
    Io(String),
}

/// list() 的条目
#[derive(Debug, Clone, PartialEq)]
pub struct SkillInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub tags: Vec<String>,
    pub active: bool,
}

#[derive(Default)]
struct State {
    skills: BTreeMap<String, Skill>,
    /// 激活顺序
    active: Vec<String>,
}

#[derive(Default)]
pub struct SkillRegistry {
    state: RwLock<State>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置 git_expert 与 code_review（均未激活）
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for skill in builtin_skills() {
            registry.register(skill);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 注册；同 ID 覆盖旧技能（激活状态保留）
    pub fn register(&self, skill: Skill) {
        tracing::info!(skill = %skill.meta.id, "skill registered");
        self.write().skills.insert(skill.meta.id.clone(), skill);
    }

    pub fn unregister(&self, id: &str) -> bool {
        let mut state = self.write();
        state.active.retain(|a| a != id);
        state.skills.remove(id).is_some()
    }

    /// 从目录加载并注册，返回数量
    pub fn load_from_directory(&self, dir: &std::path::Path) -> Result<usize, SkillError> {
        let skills = loader::load_dir(dir).map_err(|e| SkillError::Io(e.to_string()))?;
        let count = skills.len();
        for skill in skills {
            self.register(skill);
        }
        Ok(count)
    }

    /// 激活；依赖技能须已激活，声明的工具须在 available_tools 中。已激活时直接成功
    pub fn activate(&self, id: &str, available_tools: &HashSet<String>) -> Result<(), SkillError> {
        let mut state = self.write();
        let skill = state
            .skills
            .get(id)
            .ok_or_else(|| SkillError::NotFound(id.to_string()))?;
        if state.active.iter().any(|a| a == id) {
            return Ok(());
        }
        if let Some(dep) = skill.meta.dependencies.iter().find(|d| !state.active.contains(d)) {
            return Err(SkillError::MissingDependency {
                skill: id.to_string(),
                dependency: dep.clone(),
            });
        }
        if let Some(tool) = skill.meta.tools.iter().find(|t| !available_tools.contains(*t)) {
            return Err(SkillError::MissingTool {
                skill: id.to_string(),
                tool: tool.clone(),
            });
        }
        state.active.push(id.to_string());
        tracing::info!(skill = %id, "skill activated");
        Ok(())
    }

    pub fn deactivate(&self, id: &str) -> bool {
        let mut state = self.write();
        let before = state.active.len();
        state.active.retain(|a| a != id);
        let removed = state.active.len() != before;
        if removed {
            tracing::info!(skill = %id, "skill deactivated");
        }
        removed
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.read().active.iter().any(|a| a == id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.read().active.clone()
    }

    /// 激活技能的提示词段落，按激活顺序以空行连接；无内容时为空串
    pub fn combined_prompt(&self) -> String {
        let state = self.read();
        state
            .active
            .iter()
            .filter_map(|id| state.skills.get(id))
            .filter(|s| !s.prompt.trim().is_empty())
            .map(|s| format!("## Skill: {}\n\n{}", s.meta.name, s.prompt.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// 激活技能声明的工具名（去重，按首次出现顺序）
    pub fn combined_tools(&self) -> Vec<String> {
        let state = self.read();
        let mut seen = HashSet::new();
        state
            .active
            .iter()
            .filter_map(|id| state.skills.get(id))
            .flat_map(|s| s.meta.tools.iter())
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    }

    pub fn list(&self) -> Vec<SkillInfo> {
        let state = self.read();
        state
            .skills
            .values()
            .map(|s| SkillInfo {
                id: s.meta.id.clone(),
                name: s.meta.name.clone(),
                description: s.meta.description.clone(),
                version: s.meta.version.clone(),
                tags: s.meta.tags.clone(),
                active: state.active.contains(&s.meta.id),
            })
            .collect()
    }
}

fn builtin(id: &str, name: &str, description: &str, tags: &[&str], prompt: &str) -> Skill {
    Skill::new(
        SkillMeta {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: "1.0.0".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            dependencies: Vec::new(),
            tools: Vec::new(),
        },
        prompt,
    )
}

pub fn builtin_skills() -> Vec<Skill> {
    vec![
        builtin(
            "git_expert",
            "Git expert",
            "Git workflows and commit hygiene",
            &["git", "built-in"],
            "When working with Git:\n\
             - Check `git status` before making changes\n\
             - Write commit messages in the imperative mood\n\
             - Keep commits atomic, one logical change each\n\
             - Review `git diff` before committing",
        ),
        builtin(
            "code_review",
            "Code review",
            "Review checklist for correctness and quality",
            &["review", "built-in"],
            "When reviewing code, check correctness, readability, performance, security and test coverage.\n\
             Give specific, constructive suggestions.",
        ),
    ]
}
