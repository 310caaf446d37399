//! Request dispatch shared by every server loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{json, Value};
use tracing::Instrument;

use tw_protocol::mcp::{methods, Implementation, PROTOCOL_VERSION};
use tw_protocol::{Request, Response, RpcError, ToolsListResult};

use crate::registry::ToolRegistry;

/// Answers requests against a [`ToolRegistry`].  Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    server_info: Implementation,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            server_info: Implementation {
                name: "toolwire".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        }
    }

    pub fn with_server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.server_info = Implementation {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    /// Produce exactly one response for `request`.  Never fails: every
    /// problem becomes a JSON-RPC error object.
    pub async fn dispatch(&self, request: Request) -> Response {
        let span = tracing::info_span!("rpc.dispatch", id = request.id, method = %request.method);
        self.route(request).instrument(span).await
    }

    async fn route(&self, request: Request) -> Response {
        let id = request.id;
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => Ok(self.initialize_result()),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => self.list_tools(),
            methods::TOOLS_CALL => self.call_tool(&request).await,
            other => {
                tracing::debug!(id, method = %other, "unknown method");
                Err(RpcError::method_not_found(other))
            }
        };

        match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::failure(id, error),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": self.server_info,
        })
    }

    fn list_tools(&self) -> Result<Value, RpcError> {
        let result = ToolsListResult {
            tools: self.registry.descriptors(),
        };
        serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
    }

    async fn call_tool(&self, request: &Request) -> Result<Value, RpcError> {
        let params = request.params.as_ref();
        // A call without a usable name names no registered tool.
        let Some(name) = params.and_then(|p| p.get("name")).and_then(Value::as_str) else {
            tracing::warn!(id = request.id, "tools/call without a tool name");
            return Err(RpcError::tool_not_found("(none)"));
        };
        let arguments = match params.and_then(|p| p.get("arguments")) {
            None | Some(Value::Null) => json!({}),
            Some(other) => other.clone(),
        };

        let Some(handler) = self.registry.get(name) else {
            tracing::warn!(id = request.id, tool = %name, "no handler registered for tool");
            return Err(RpcError::tool_not_found(name));
        };

        tracing::debug!(id = request.id, tool = %name, "calling tool");
        // A panicking handler still produces a response.
        match AssertUnwindSafe(handler.call(arguments)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                tracing::debug!(id = request.id, tool = %name, error = %e, "tool failed");
                Err(RpcError::handler(e.to_string()))
            }
            Err(_panic) => {
                tracing::error!(id = request.id, tool = %name, "tool handler panicked");
                Err(RpcError::handler(format!("tool '{name}' panicked")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolError;
    use tw_protocol::message::codes;
    use tw_protocol::ToolDescriptor;

    struct Panics;

    #[async_trait::async_trait]
    impl crate::registry::ToolHandler for Panics {
        async fn call(&self, _args: Value) -> crate::registry::ToolResult {
            panic!("handler bug");
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut reg = ToolRegistry::new();
        reg.register_fn(ToolDescriptor::new("echo", "Echo"), |args| async move {
            Ok(json!({ "content": [{ "type": "text", "text": args.to_string() }] }))
        })
        .register_fn(ToolDescriptor::new("fail", "Always fails"), |_| async {
            Err(ToolError::Failed("kaboom".into()))
        })
        .register_fn(ToolDescriptor::new("picky", "Rejects args"), |_| async {
            Err(ToolError::InvalidArgs("missing x".into()))
        })
        .register(ToolDescriptor::new("panic", "Panics"), Panics);
        Dispatcher::new(reg)
    }

    fn call(id: u64, params: Value) -> Request {
        Request::new(id, methods::TOOLS_CALL, Some(params))
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let resp = dispatcher()
            .dispatch(Request::new(1, methods::INITIALIZE, Some(json!({}))))
            .await;
        let result = resp.into_result().unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(result["serverInfo"]["name"], "toolwire");
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let resp = dispatcher().dispatch(Request::new(2, methods::PING, None)).await;
        assert_eq!(resp.id, 2);
        assert_eq!(resp.into_result().unwrap(), json!({}));
    }

    #[tokio::test]
    async fn tools_list_is_sorted() {
        let resp = dispatcher().dispatch(Request::new(3, methods::TOOLS_LIST, None)).await;
        let list: ToolsListResult = serde_json::from_value(resp.into_result().unwrap()).unwrap();
        let names: Vec<_> = list.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "fail", "panic", "picky"]);
    }

    #[tokio::test]
    async fn call_passes_arguments() {
        let resp = dispatcher()
            .dispatch(call(4, json!({"name": "echo", "arguments": {"a": 1}})))
            .await;
        assert_eq!(resp.into_result().unwrap()["content"][0]["text"], r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn missing_arguments_default_to_empty_object() {
        let resp = dispatcher().dispatch(call(5, json!({"name": "echo"}))).await;
        assert_eq!(resp.into_result().unwrap()["content"][0]["text"], "{}");
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let resp = dispatcher()
            .dispatch(call(6, json!({"name": "does-not-exist"})))
            .await;
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
        assert_eq!(err.message, "Tool not found: does-not-exist");
    }

    #[tokio::test]
    async fn handler_failure_carries_message() {
        let resp = dispatcher().dispatch(call(7, json!({"name": "fail"}))).await;
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, codes::HANDLER_ERROR);
        assert_eq!(err.message, "kaboom");
    }

    #[tokio::test]
    async fn invalid_args_is_a_handler_error() {
        let resp = dispatcher().dispatch(call(8, json!({"name": "picky"}))).await;
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, codes::HANDLER_ERROR);
        assert_eq!(err.message, "invalid arguments: missing x");
    }

    #[tokio::test]
    async fn greet_with_a_non_string_name_is_a_handler_error() {
        let d = Dispatcher::new(crate::tools::builtin_registry());
        let resp = d
            .dispatch(call(13, json!({"name": "greet", "arguments": {"name": 42}})))
            .await;
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, codes::HANDLER_ERROR);
        assert!(err.message.contains("name must be a string"));
    }

    #[tokio::test]
    async fn panicking_handler_still_answers() {
        let d = dispatcher();
        let resp = d.dispatch(call(9, json!({"name": "panic"}))).await;
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, codes::HANDLER_ERROR);
        assert_eq!(err.message, "tool 'panic' panicked");

        // The dispatcher is still usable afterwards.
        let resp = d.dispatch(Request::new(10, methods::PING, None)).await;
        assert!(!resp.is_error());
    }

    #[tokio::test]
    async fn call_without_a_tool_name_is_tool_not_found() {
        let d = dispatcher();
        let resp = d.dispatch(call(11, json!({"arguments": {}}))).await;
        assert_eq!(resp.into_result().unwrap_err().code, codes::METHOD_NOT_FOUND);

        let resp = d.dispatch(call(14, json!({"name": 7}))).await;
        assert_eq!(resp.into_result().unwrap_err().code, codes::METHOD_NOT_FOUND);

        let resp = d.dispatch(Request::new(15, methods::TOOLS_CALL, None)).await;
        assert_eq!(resp.into_result().unwrap_err().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let resp = dispatcher()
            .dispatch(Request::new(12, "resources/list", None))
            .await;
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }

    // ── Tracing ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn handlers_run_inside_the_dispatch_span() {
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());

        let mut reg = ToolRegistry::new();
        reg.register_fn(ToolDescriptor::new("span", "Reports its span"), |_| async {
            let name = tracing::Span::current()
                .metadata()
                .map(|m| m.name())
                .unwrap_or("none");
            Ok(json!({ "content": [{ "type": "text", "text": name }] }))
        });
        let resp = Dispatcher::new(reg)
            .dispatch(call(21, json!({"name": "span"})))
            .await;
        let result = resp.into_result().unwrap();
        assert_eq!(result["content"][0]["text"], "rpc.dispatch");
    }
}
