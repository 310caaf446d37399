//! JSON-RPC 2.0 message types.
//!
//! Each message is a single line of JSON (newline-delimited).  Inbound text
//! is classified by [`Message::decode`]; anything that is not a well-formed
//! request, response or notification is a [`ProtocolError::Parse`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifiers are positive integers, allocated per channel.
pub type RequestId = u64;

/// Standard and application error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A tool handler failed while executing.
    pub const HANDLER_ERROR: i64 = -32000;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed JSON or a shape that is not a JSON-RPC 2.0 message.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

fn parse_err(msg: impl Into<String>) -> ProtocolError {
    ProtocolError::Parse(msg.into())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests & notifications
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 request (has an `id` and expects exactly one response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Deserialize `params` into `T`; absent params are treated as `{}`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let params = self
            .params
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));
        serde_json::from_value(params)
    }
}

/// A JSON-RPC 2.0 notification (no `id`, never answered).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 response.  Built through [`Response::success`] or
/// [`Response::failure`] so exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extract the result value, returning the error object for failures.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Coarse classification of [`RpcError`] codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MethodNotFound,
    HandlerError,
    Other,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Tool not found: {name}"))
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(codes::HANDLER_ERROR, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code {
            codes::METHOD_NOT_FOUND => ErrorKind::MethodNotFound,
            codes::HANDLER_ERROR => ErrorKind::HandlerError,
            _ => ErrorKind::Other,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Any inbound or outbound JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Parse and validate one line of JSON.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| parse_err(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut obj) = value else {
            return Err(parse_err("expected a JSON object"));
        };

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            _ => return Err(parse_err("missing or unsupported jsonrpc version")),
        }

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .ok_or_else(|| parse_err(format!("id must be a non-negative integer, got {v}")))?,
            ),
        };

        match (obj.remove("method"), id) {
            (Some(Value::String(method)), Some(id)) => Ok(Message::Request(Request {
                jsonrpc: JSONRPC_VERSION.into(),
                id,
                method,
                params: obj.remove("params"),
            })),
            (Some(Value::String(method)), None) => Ok(Message::Notification(Notification {
                jsonrpc: JSONRPC_VERSION.into(),
                method,
                params: obj.remove("params"),
            })),
            (Some(_), _) => Err(parse_err("method must be a string")),
            (None, Some(id)) => {
                let result = obj.remove("result");
                let error = obj.remove("error");
                match (result, error) {
                    (Some(result), None) => Ok(Message::Response(Response::success(id, result))),
                    (None, Some(error)) => {
                        let error: RpcError = serde_json::from_value(error)
                            .map_err(|e| parse_err(format!("invalid error object: {e}")))?;
                        Ok(Message::Response(Response::failure(id, error)))
                    }
                    _ => Err(parse_err(
                        "response must carry exactly one of result or error",
                    )),
                }
            }
            (None, None) => Err(parse_err("message has neither method nor id")),
        }
    }

    /// Serialize to JSON without a trailing newline.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let json = match self {
            Message::Request(r) => serde_json::to_string(r)?,
            Message::Response(r) => serde_json::to_string(r)?,
            Message::Notification(n) => serde_json::to_string(n)?,
        };
        Ok(json)
    }

    /// Serialize to JSON followed by exactly one `\n`.
    pub fn encode_line(&self) -> Result<String, ProtocolError> {
        let mut line = self.encode()?;
        line.push('\n');
        Ok(line)
    }

    /// The request / response id, if this message carries one.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Message::Request(r) => Some(r.id),
            Message::Response(r) => Some(r.id),
            Message::Notification(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_request() {
        let req = Request::new(1, "tools/list", None);
        let json = Message::from(req).encode().unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn encode_line_appends_single_newline() {
        let line = Message::from(Notification::new("notifications/initialized"))
            .encode_line()
            .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(!line.contains("\"id\""));
    }

    #[test]
    fn decode_request() {
        let msg = Message::decode(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"greet"}}"#,
        )
        .unwrap();
        match msg {
            Message::Request(req) => {
                assert_eq!(req.id, 7);
                assert_eq!(req.method, "tools/call");
                assert_eq!(req.params, Some(json!({"name": "greet"})));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn decode_notification() {
        let msg = Message::decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert!(matches!(msg, Message::Notification(n) if n.method == "notifications/initialized"));
    }

    #[test]
    fn decode_success_response_with_null_result() {
        let msg = Message::decode(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        let Message::Response(resp) = msg else {
            panic!("expected response");
        };
        assert_eq!(resp.result, Some(Value::Null));
        assert!(!resp.is_error());
        // null results survive re-encoding
        let line = Message::Response(resp).encode().unwrap();
        assert!(line.contains("\"result\":null"));
    }

    #[test]
    fn decode_error_response() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Tool not found"}}"#;
        let Message::Response(resp) = Message::decode(raw).unwrap() else {
            panic!("expected response");
        };
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
        assert_eq!(err.kind(), ErrorKind::MethodNotFound);
    }

    #[test]
    fn response_with_both_result_and_error_is_rejected() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#;
        assert!(matches!(Message::decode(raw), Err(ProtocolError::Parse(_))));
    }

    #[test]
    fn response_with_neither_is_rejected() {
        assert!(Message::decode(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
    }

    #[test]
    fn wrong_version_is_rejected() {
        assert!(Message::decode(r#"{"jsonrpc":"1.0","id":1,"result":{}}"#).is_err());
        assert!(Message::decode(r#"{"id":1,"result":{}}"#).is_err());
    }

    #[test]
    fn non_integer_id_is_rejected() {
        assert!(Message::decode(r#"{"jsonrpc":"2.0","id":"abc","method":"x"}"#).is_err());
        assert!(Message::decode(r#"{"jsonrpc":"2.0","id":-4,"result":1}"#).is_err());
    }

    #[test]
    fn garbage_is_parse_error() {
        assert!(matches!(Message::decode("{not json"), Err(ProtocolError::Parse(_))));
        assert!(matches!(Message::decode("[1,2]"), Err(ProtocolError::Parse(_))));
    }

    #[test]
    fn params_as_defaults_to_empty_object() {
        #[derive(Deserialize)]
        struct P {
            #[serde(default)]
            name: Option<String>,
        }
        let req = Request::new(1, "x", None);
        let p: P = req.params_as().unwrap();
        assert!(p.name.is_none());
    }

    #[test]
    fn rpc_error_display() {
        let err = RpcError::handler("boom");
        assert_eq!(format!("{err}"), "JSON-RPC error -32000: boom");
        assert_eq!(err.kind(), ErrorKind::HandlerError);
    }
}
