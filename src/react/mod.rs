//! 推理层：工具调用恢复、过程事件、单轮状态机

pub mod events;
pub mod loop_;
pub mod normalizer;

pub use events::AgentEvent;
pub use loop_::{is_trivial, run_turn, TurnContext};
pub use normalizer::{Provenance, Recovered, ToolCallIntent, ToolCallNormalizer};
