//! 沙箱文件系统工具
//!
//! SafeFs 绑定工作区根目录，所有路径经 resolve 校验必须落在根下（禁止 ../ 逃逸）；
//! CatTool / LsTool 在其上提供只读的 cat / ls，风险等级均为 low。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::tools::Tool;

/// cat 单次返回的最大字符数，超出部分截断
const MAX_READ_CHARS: usize = 16_000;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析相对路径；空串与 "." 指向根目录
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let trimmed = path.trim().trim_start_matches("./");
        if trimmed.is_empty() || trimmed == "." {
            return Ok(self.root_dir.clone());
        }
        let canonical = self
            .root_dir
            .join(trimmed)
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", trimmed)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(trimmed.to_string()))
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        let text = std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))?;
        if text.chars().count() > MAX_READ_CHARS {
            let head: String = text.chars().take(MAX_READ_CHARS).collect();
            Ok(format!("{}\n... (truncated)", head))
        } else {
            Ok(text)
        }
    }

    /// 列目录：隐藏文件跳过，目录名带 "/" 后缀，按名排序
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, AgentError> {
        let base = self.resolve(path)?;
        let reader = std::fs::read_dir(&base)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {}", e)))?;
        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();
        Ok(entries)
    }
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description }
        },
        "required": []
    })
}

/// cat：读取工作区内文件
pub struct CatTool {
    fs: SafeFs,
}

impl CatTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for CatTool {
    fn name(&self) -> &str {
        "cat"
    }

    fn description(&self) -> &str {
        "Read a file inside the workspace"
    }

    fn parameters_schema(&self) -> Value {
        path_schema("File path relative to the workspace root")
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or("");
        if path.trim().is_empty() {
            return Err("missing required argument `path`".to_string());
        }
        tracing::debug!(path = %path, "cat");
        self.fs.read_file(path).map_err(|e| e.to_string())
    }
}

/// ls：列出工作区内目录
pub struct LsTool {
    fs: SafeFs,
}

impl LsTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory inside the workspace"
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Directory path relative to the workspace root, default '.'")
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        tracing::debug!(path = %path, "ls");
        let entries = self.fs.list_dir(path).map_err(|e| e.to_string())?;
        if entries.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }
}
