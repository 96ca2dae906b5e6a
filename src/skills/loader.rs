//! 技能加载器
//!
//! 从技能目录加载：每个子目录一个技能，`skill.toml` 为元数据，`prompt.md` 为注入 system 提示词的内容。

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 技能元数据（skill.toml 的 [skill] 表）
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SkillMeta {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 须先激活的其他技能 ID
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 技能依赖的工具名；激活时须已注册
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Deserialize)]
struct SkillToml {
    skill: SkillMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub meta: SkillMeta,
    pub prompt: String,
    /// 内置技能为 None
    pub dir: Option<PathBuf>,
}

impl Skill {
    pub fn new(meta: SkillMeta, prompt: impl Into<String>) -> Self {
        Self {
            meta,
            prompt: prompt.into(),
            dir: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn summary(&self) -> String {
        format!("[{}] {}: {}", self.meta.id, self.meta.name, self.meta.description)
    }
}

/// 加载目录下所有技能；目录不存在时返回空，单个技能损坏时跳过
pub fn load_dir(dir: &Path) -> std::io::Result<Vec<Skill>> {
    let mut skills = Vec::new();
    if !dir.exists() {
        return Ok(skills);
    }
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(skill) = load_skill(&path) {
                skills.push(skill);
            }
        }
    }
    skills.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
    tracing::info!(dir = %dir.display(), count = skills.len(), "skills loaded");
    Ok(skills)
}

fn load_skill(dir: &Path) -> Option<Skill> {
    let skill_toml = dir.join("skill.toml");
    if !skill_toml.exists() {
        return None;
    }
    let parsed = std::fs::read_to_string(&skill_toml)
        .map_err(|e| e.to_string())
        .and_then(|content| toml::from_str::<SkillToml>(&content).map_err(|e| e.to_string()));
    let meta = match parsed {
        Ok(data) => data.skill,
        Err(e) => {
            tracing::warn!(path = %skill_toml.display(), error = %e, "skipping invalid skill");
            return None;
        }
    };
    let prompt = std::fs::read_to_string(dir.join("prompt.md")).unwrap_or_default();
    Some(Skill {
        meta,
        prompt,
        dir: Some(dir.to_path_buf()),
    })
}
