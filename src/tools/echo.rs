//! Echo 工具（测试与连通性检查用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

/// Echo 工具：原样返回 text 参数
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back unchanged"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        args.get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "missing required argument `text`".to_string())
    }
}
