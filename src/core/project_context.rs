//! 项目上下文（DRONE.md）
//!
//! 按层级加载项目说明文件并合并，注入到新会话的 system 提示词中：
//! 1. 全局：`~/.drone/DRONE.md`（用户偏好）
//! 2. 项目根：`<root>/DRONE.md`
//! 3. 子目录：`<root>/**/DRONE.md`（跳过隐藏目录、target、node_modules）

use std::path::{Path, PathBuf};

pub const CONTEXT_FILE_NAME: &str = "DRONE.md";

const MAX_SCAN_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextScope {
    Global,
    Project,
    Nested,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextFile {
    pub path: PathBuf,
    pub content: String,
    pub scope: ContextScope,
}

impl ContextFile {
    fn label(&self) -> String {
        match self.scope {
            ContextScope::Global => "User Preferences".to_string(),
            ContextScope::Project => "Project Context".to_string(),
            ContextScope::Nested => {
                let dir = self
                    .path
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("Local Context ({})", dir)
            }
        }
    }
}

/// 默认全局文件位置；无 HOME 时为 None
pub fn default_global_file() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".drone").join(CONTEXT_FILE_NAME))
}

#[derive(Debug, Clone)]
pub struct ProjectContext {
    root: PathBuf,
    global_file: Option<PathBuf>,
    files: Vec<ContextFile>,
    merged: String,
}

impl ProjectContext {
    /// 创建并立即加载
    pub fn load(root: impl AsRef<Path>, global_file: Option<PathBuf>) -> Self {
        let mut ctx = Self {
            root: root.as_ref().to_path_buf(),
            global_file,
            files: Vec::new(),
            merged: String::new(),
        };
        ctx.reload();
        ctx
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[ContextFile] {
        &self.files
    }

    /// 重新读取所有文件；读取失败的文件跳过
    pub fn reload(&mut self) {
        self.files.clear();

        if let Some(global) = self.global_file.clone() {
            self.read_into(&global, ContextScope::Global);
        }
        let project_file = self.root.join(CONTEXT_FILE_NAME);
        self.read_into(&project_file, ContextScope::Project);

        // 根目录本身不参与过滤（可能就是隐藏目录）；深度 1 的文件即项目根文件
        let mut nested: Vec<PathBuf> = walkdir::WalkDir::new(&self.root)
            .max_depth(MAX_SCAN_DEPTH)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || (!name.starts_with('.') && name != "target" && name != "node_modules")
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.depth() >= 2 && e.file_type().is_file() && e.file_name() == CONTEXT_FILE_NAME)
            .map(|e| e.into_path())
            .collect();
        nested.sort();
        for path in nested {
            self.read_into(&path, ContextScope::Nested);
        }

        self.merged = self
            .files
            .iter()
            .map(|f| format!("## {}\n\n{}", f.label(), f.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        tracing::info!(files = self.files.len(), root = %self.root.display(), "project context loaded");
    }

    fn read_into(&mut self, path: &Path, scope: ContextScope) {
        if !path.is_file() {
            return;
        }
        match std::fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => self.files.push(ContextFile {
                path: path.to_path_buf(),
                content,
                scope,
            }),
            Ok(_) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to read project context file"),
        }
    }

    pub fn has_context(&self) -> bool {
        !self.merged.trim().is_empty()
    }

    /// 合并后的全部内容
    pub fn context(&self) -> &str {
        &self.merged
    }

    /// 某目录适用的内容：全局 + 项目根 + 其祖先目录中的子目录文件
    pub fn context_for_directory(&self, dir: &Path) -> String {
        self.files
            .iter()
            .filter(|f| match f.scope {
                ContextScope::Global | ContextScope::Project => true,
                ContextScope::Nested => f.path.parent().map_or(false, |p| dir.starts_with(p)),
            })
            .map(|f| f.content.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// 追加到 system 提示词的段落；无内容时为空串
    pub fn system_prompt_injection(&self) -> String {
        if !self.has_context() {
            return String::new();
        }
        format!(
            "## Project Context (from {name})\n\n\
             The following information has been loaded from {name} files in this project.\n\
             Follow these instructions and use this context to guide your responses.\n\n\
             {merged}\n\n---",
            name = CONTEXT_FILE_NAME,
            merged = self.merged
        )
    }

    pub fn summary(&self) -> String {
        if self.files.is_empty() {
            return format!("No {} files found.", CONTEXT_FILE_NAME);
        }
        let mut lines = vec![format!("Loaded {} {} file(s):", self.files.len(), CONTEXT_FILE_NAME)];
        for f in &self.files {
            let scope = match f.scope {
                ContextScope::Global => "global",
                ContextScope::Project => "project",
                ContextScope::Nested => "nested",
            };
            lines.push(format!("  - [{}] {} ({} chars)", scope, f.path.display(), f.content.chars().count()));
        }
        lines.join("\n")
    }
}
