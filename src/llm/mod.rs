//! LLM 层：后端抽象与实现（Ollama / Mock）

pub mod mock;
pub mod ollama;
pub mod traits;

pub use mock::{MockLlmClient, RecordedCall};
pub use ollama::OllamaClient;
pub use traits::{ChatResponse, LlmClient, LlmError, Summarizer, TokenUsage};
