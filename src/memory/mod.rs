//! 记忆层：消息模型、会话（压缩）、会话持久化、长期记忆

pub mod conversation;
pub mod long_term;
pub mod persistence;
pub mod session;

pub use conversation::{Message, Role, ToolCallRequest};
pub use long_term::{format_memory_context, Exchange, InMemoryStore, MemoryError, MemorySnippet, MemoryStore};
pub use persistence::{SessionStore, SessionStoreError, SessionSummary};
pub use session::{CompactionOutcome, Session};
