//! Demo tools served by `toolwire serve` and `toolwire mailbox-server`.

use serde::Serialize;
use serde_json::{json, Value};

use tw_protocol::{ToolCallResult, ToolDescriptor};

use crate::registry::{ToolError, ToolHandler, ToolRegistry, ToolResult};

pub const SERVER_NAME: &str = "toolwire-demo-server";

/// `greet`: `Hello, <name>!`, or `Hello, world!` without a name.
pub struct Greet;

impl Greet {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("greet", "Greet someone by name (defaults to the world)").with_input_schema(json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Who to greet" }
            }
        }))
    }
}

#[async_trait::async_trait]
impl ToolHandler for Greet {
    async fn call(&self, args: Value) -> ToolResult {
        let name = match args.get("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.trim()).filter(|s| !s.is_empty()),
            Some(other) => {
                return Err(ToolError::InvalidArgs(format!("name must be a string, got {other}")))
            }
        };
        to_value(ToolCallResult::text(format!("Hello, {}!", name.unwrap_or("world"))))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfo {
    server_name: String,
    version: String,
    timestamp: String,
    tool_count: usize,
}

/// `get-info`: structured information about this server.
pub struct GetInfo {
    tool_count: usize,
}

impl GetInfo {
    pub fn new(tool_count: usize) -> Self {
        Self { tool_count }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("get-info", "Get structured information about the server")
    }
}

#[async_trait::async_trait]
impl ToolHandler for GetInfo {
    async fn call(&self, _args: Value) -> ToolResult {
        let info = ServerInfo {
            server_name: SERVER_NAME.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            tool_count: self.tool_count,
        };
        let structured = serde_json::to_value(&info).map_err(|e| ToolError::Failed(e.to_string()))?;
        let text = serde_json::to_string_pretty(&info).map_err(|e| ToolError::Failed(e.to_string()))?;

        let mut result = ToolCallResult::text(text);
        result.structured_content = Some(structured);
        to_value(result)
    }
}

fn to_value(result: ToolCallResult) -> ToolResult {
    serde_json::to_value(result).map_err(|e| ToolError::Failed(e.to_string()))
}

/// A registry holding the demo tools.
pub fn builtin_registry() -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(Greet::descriptor(), Greet);
    // get-info counts itself.
    let tool_count = reg.len() + 1;
    reg.register(GetInfo::descriptor(), GetInfo::new(tool_count));
    reg
}
