//! 会话持久化
//!
//! 会话目录下每个会话一个 pretty JSON 文件（`<name 或 id>.json`），
//! 支持保存、按名称/ID 加载、按更新时间倒序列出。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::memory::Session;

#[derive(Error, Debug)]
pub enum SessionStoreError {
    #[error("Session IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    NotFound(String),

    /// 名称为空、含路径分隔符或为 . / ..
    #[error("Invalid session name: {0:?}")]
    InvalidName(String),
}

/// 会话名只能是会话目录下的单个文件名
fn checked_name(name: &str) -> Result<&str, SessionStoreError> {
    let name = name.trim();
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(SessionStoreError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// 列表用的会话摘要
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub name: Option<String>,
    pub file: PathBuf,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 保存会话；给定 name 时同时写入 session.name。目录不存在时自动创建。
    /// 文件名含路径分隔符时返回 InvalidName，不写任何文件
    pub fn save(&self, session: &mut Session, name: Option<&str>) -> Result<PathBuf, SessionStoreError> {
        let name = name.map(str::trim).filter(|n| !n.is_empty()).map(checked_name).transpose()?;
        let stem = checked_name(name.or(session.name.as_deref()).unwrap_or(&session.id))?.to_string();
        if let Some(name) = name {
            session.name = Some(name.to_string());
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", stem));
        std::fs::write(&path, serde_json::to_string_pretty(session)?)?;
        tracing::info!(path = %path.display(), messages = session.len(), "session saved");
        Ok(path)
    }

    /// 按名称或 ID 加载：先试 `<x>.json`，再试 `<x>`
    pub fn load(&self, name_or_id: &str) -> Result<Session, SessionStoreError> {
        let name_or_id = checked_name(name_or_id)?;
        let candidates = [
            self.dir.join(format!("{}.json", name_or_id)),
            self.dir.join(name_or_id),
        ];
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| SessionStoreError::NotFound(name_or_id.to_string()))?;
        let data = std::fs::read_to_string(path)?;
        let session: Session = serde_json::from_str(&data)?;
        tracing::info!(path = %path.display(), messages = session.len(), "session loaded");
        Ok(session)
    }

    /// 列出所有可读会话，按 updated_at 倒序；损坏文件跳过
    pub fn list(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .ok()
                .and_then(|data| serde_json::from_str::<Session>(&data).ok());
            match parsed {
                Some(s) => out.push(SessionSummary {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    file: path,
                    message_count: s.len(),
                    updated_at: s.updated_at,
                }),
                None => tracing::debug!(path = %path.display(), "skipping unreadable session file"),
            }
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}
