//! MCP wire types: JSON-RPC 2.0 frames exchanged over stdio.
//!
//! Every frame is one JSON document on its own line. Inbound lines are
//! classified with [`parse_frame`] and requests are narrowed into a typed
//! [`ClientRequest`]; outbound frames are [`Response`] and
//! [`Notification`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::McpError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

pub const SERVER_NAME: &str = "Comfy MCP Server";

/// Logger name attached to `notifications/message` frames.
pub const LOGGER_NAME: &str = "comfy-mcp";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// JSON-RPC request id: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, Deserialize)]
struct RawFrame {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

/// One inbound line, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Has a method and an id; must be answered.
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    /// Has a method but no id; never answered.
    Notification { method: String },
    /// A client reply to a server request. This server sends none, so
    /// these are dropped.
    Response { id: RequestId },
}

/// A frame that could not be classified, with the id to answer to when
/// one was readable.
#[derive(Debug)]
pub struct FrameError {
    pub id: Option<RequestId>,
    pub error: McpError,
}

/// Parse and classify one line of input.
pub fn parse_frame(line: &str) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_str(line).map_err(|e| FrameError {
        id: None,
        error: McpError::Parse(e),
    })?;

    let raw: RawFrame = serde_json::from_value(value).map_err(|e| FrameError {
        id: None,
        error: McpError::InvalidRequest(e.to_string()),
    })?;

    if raw.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
        return Err(FrameError {
            id: raw.id,
            error: McpError::InvalidRequest("jsonrpc must be \"2.0\"".into()),
        });
    }

    match (raw.id, raw.method) {
        (Some(id), Some(method)) => Ok(Frame::Request {
            id,
            method,
            params: raw.params,
        }),
        (None, Some(method)) => Ok(Frame::Notification { method }),
        (Some(id), None) => Ok(Frame::Response { id }),
        (None, None) => Err(FrameError {
            id: None,
            error: McpError::InvalidRequest("missing method".into()),
        }),
    }
}

/// Requests this server understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Initialize(InitializeParams),
    Ping,
    ListTools,
    CallTool(CallToolParams),
}

impl ClientRequest {
    pub fn parse(method: &str, params: Option<Value>) -> Result<Self, McpError> {
        match method {
            "initialize" => Ok(Self::Initialize(parse_params(params)?)),
            "ping" => Ok(Self::Ping),
            "tools/list" => Ok(Self::ListTools),
            "tools/call" => Ok(Self::CallTool(parse_params(params)?)),
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    let value = match params {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(value) => value,
    };
    serde_json::from_value(value).map_err(|e| McpError::InvalidParams(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

impl CallToolParams {
    /// String argument `key`, if present.
    pub fn str_argument(&self, key: &str) -> Option<&str> {
        self.arguments.as_ref()?.get(key)?.as_str()
    }
}

/// Pick the protocol revision to answer `initialize` with: the client's
/// if supported, otherwise the newest one.
pub fn negotiate_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|req| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|v| **v == req))
        .copied()
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(ErrorObject),
}

/// Reply to a request. `id` is `null` when the request id was unreadable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: &McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            payload: ResponsePayload::Error(ErrorObject {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }
}

/// Severity of a `notifications/message` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl Notification {
    /// `notifications/message` carrying one log line.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: "notifications/message",
            params: json!({
                "level": level,
                "logger": LOGGER_NAME,
                "data": message.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: &'static str,
    pub capabilities: Value,
    pub server_info: Value,
}

impl InitializeResult {
    pub fn new(params: &InitializeParams) -> Self {
        Self {
            protocol_version: negotiate_version(params.protocol_version.as_deref()),
            capabilities: json!({
                "tools": { "listChanged": false },
                "logging": {},
            }),
            server_info: json!({
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        }
    }
}

/// Entry in the `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Tool taking a single required string argument.
    pub fn with_string_arg(
        name: &'static str,
        description: &'static str,
        arg: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            input_schema: json!({
                "type": "object",
                "properties": { arg: { "type": "string" } },
                "required": [arg],
            }),
        }
    }
}

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded bytes.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn classifies_requests_notifications_and_responses() {
        assert_eq!(
            parse_frame(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap(),
            Frame::Request {
                id: RequestId::Number(1),
                method: "ping".into(),
                params: None,
            }
        );
        assert_eq!(
            parse_frame(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap(),
            Frame::Notification {
                method: "notifications/initialized".into()
            }
        );
        assert_eq!(
            parse_frame(r#"{"jsonrpc":"2.0","id":"a","result":{}}"#).unwrap(),
            Frame::Response {
                id: RequestId::String("a".into())
            }
        );
    }

    #[test]
    fn malformed_json_is_parse_error_without_id() {
        let err = parse_frame("{not json").unwrap_err();
        assert!(err.id.is_none());
        assert_eq!(err.error.code(), -32700);
    }

    #[test]
    fn wrong_version_keeps_id() {
        let err = parse_frame(r#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(7)));
        assert_eq!(err.error.code(), -32600);
    }

    #[test]
    fn unknown_method_and_bad_params() {
        assert_matches!(
            ClientRequest::parse("resources/list", None),
            Err(McpError::MethodNotFound(m)) if m == "resources/list"
        );
        assert_matches!(
            ClientRequest::parse("tools/call", Some(json!({ "arguments": {} }))),
            Err(McpError::InvalidParams(_))
        );
    }

    #[test]
    fn call_params_expose_string_arguments() {
        let request = ClientRequest::parse(
            "tools/call",
            Some(json!({ "name": "generate_image", "arguments": { "prompt": "a cat", "n": 2 } })),
        )
        .unwrap();
        let params = assert_matches!(request, ClientRequest::CallTool(p) => p);
        assert_eq!(params.str_argument("prompt"), Some("a cat"));
        assert_eq!(params.str_argument("n"), None);
        assert_eq!(params.str_argument("missing"), None);
    }

    #[test]
    fn version_negotiation_prefers_client_when_supported() {
        assert_eq!(negotiate_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(negotiate_version(Some("1999-01-01")), SUPPORTED_PROTOCOL_VERSIONS[0]);
        assert_eq!(negotiate_version(None), SUPPORTED_PROTOCOL_VERSIONS[0]);
    }

    #[test]
    fn responses_serialize_result_or_error() {
        let ok = serde_json::to_value(Response::success(RequestId::Number(3), json!({}))).unwrap();
        assert_eq!(ok, json!({ "jsonrpc": "2.0", "id": 3, "result": {} }));

        let err = serde_json::to_value(Response::error(
            None,
            &McpError::MethodNotFound("nope".into()),
        ))
        .unwrap();
        assert_eq!(
            err,
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": -32601, "message": "Method not found: nope" }
            })
        );
    }

    #[test]
    fn image_content_uses_mime_type_key() {
        let content = ToolContent::Image {
            data: "AAEC".into(),
            mime_type: "image/webp".into(),
        };
        assert_eq!(
            serde_json::to_value(content).unwrap(),
            json!({ "type": "image", "data": "AAEC", "mimeType": "image/webp" })
        );
    }

    #[test]
    fn log_notification_shape() {
        let frame = serde_json::to_value(Notification::log(LogLevel::Info, "Submitted prompt")).unwrap();
        assert_eq!(
            frame,
            json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": { "level": "info", "logger": "comfy-mcp", "data": "Submitted prompt" }
            })
        );
    }
}
