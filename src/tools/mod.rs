//! 工具层：Tool trait、注册表、带超时与审计的执行器，以及内置只读工具

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{CatTool, LsTool, SafeFs};
pub use registry::{Tool, ToolDefinition, ToolRegistry};
