//! Tool registry: maps tool names to descriptors and handlers.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use tw_protocol::ToolDescriptor;

/// Result type for tool handlers.  The `Ok` value is the `tools/call`
/// result object (`{ content: [...], structuredContent?: ... }`).
pub type ToolResult = Result<Value, ToolError>;

/// Errors a tool handler can return.
///
/// Both are answered with `-32000` carrying the `Display` text, so
/// `InvalidArgs` messages read `invalid arguments: ...`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Implement this trait to serve a tool.
///
/// # Example
///
/// ```rust,no_run
/// use tw_server::{ToolHandler, ToolResult};
///
/// struct Ping;
///
/// #[async_trait::async_trait]
/// impl ToolHandler for Ping {
///     async fn call(&self, _args: serde_json::Value) -> ToolResult {
///         Ok(serde_json::json!({ "content": [{ "type": "text", "text": "pong" }] }))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Execute the tool with the caller's JSON arguments (`{}` when none
    /// were sent).
    async fn call(&self, args: Value) -> ToolResult;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    async fn call(&self, args: Value) -> ToolResult {
        (self.0)(args).await
    }
}

#[derive(Clone)]
struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of tools, ordered by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  A name that is already taken is refused with a
    /// warning and the earlier registration stays in place.
    ///
    /// Returns `&mut Self` for method chaining.
    pub fn register<H: ToolHandler>(&mut self, descriptor: ToolDescriptor, handler: H) -> &mut Self {
        self.register_boxed(descriptor, Arc::new(handler))
    }

    /// Register a pre-wrapped handler.
    pub fn register_boxed(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> &mut Self {
        if self.tools.contains_key(&descriptor.name) {
            tracing::warn!(tool = %descriptor.name, "tool already registered, ignoring duplicate");
            return self;
        }
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
        self
    }

    /// Register an async closure as a tool.
    pub fn register_fn<F, Fut>(&mut self, descriptor: ToolDescriptor, f: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        self.register(descriptor, FnHandler(f))
    }

    /// Descriptors of every registered tool, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|t| t.handler.clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
