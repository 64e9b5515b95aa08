//! JSON-RPC 2.0 envelopes exchanged with the client.
//!
//! Incoming lines are decoded by [`parse_message`] into an
//! [`IncomingMessage`]; anything with an `id` is a request and everything
//! else is a notification. Outgoing messages are a success
//! [`JsonRpcResponse`], a [`JsonRpcError`], or an [`OutgoingNotification`].
//!
//! Request ids are strings or integers. Replies may leave in any order, so
//! the client matches them by id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The only `jsonrpc` value accepted or emitted.
const JSONRPC_VERSION: &str = "2.0";

/// Protocol versions the handshake accepts, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "mcp-learning-server";

/// Returns `true` if `version` can be negotiated.
#[must_use]
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Caller-assigned correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A request: expects exactly one reply carrying the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// Correlation id.
    pub id: RequestId,
    /// Method name, never empty.
    pub method: String,
    /// Raw parameters; `null` counts as absent.
    pub params: Option<Value>,
}

/// A notification from the client. Never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcNotification {
    /// Notification method.
    pub method: String,
    /// Raw parameters; `null` counts as absent.
    pub params: Option<Value>,
}

/// A decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Carries an id.
    Request(JsonRpcRequest),
    /// Carries no id.
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Method name of either kind of message.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(request) => &request.method,
            Self::Notification(notification) => &notification.method,
        }
    }
}

/// Server-to-client notification.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    jsonrpc: &'static str,
    /// Notification method.
    pub method: String,
}

impl OutgoingNotification {
    /// `notifications/<family>/list_changed`, sent after a reload publishes
    /// a new snapshot of `family`.
    #[must_use]
    pub fn list_changed(family: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: format!("notifications/{family}/list_changed"),
        }
    }
}

/// Successful reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: &'static str,
    /// Id of the request being answered.
    pub id: RequestId,
    /// Method result.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Wraps `result` as the reply to `id`.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// Numeric error codes: the JSON-RPC reserved range plus the server's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The line was not a JSON object.
    ParseError,
    /// The object was not a valid request or notification.
    InvalidRequest,
    /// Unknown method.
    MethodNotFound,
    /// Parameters failed validation.
    InvalidParams,
    /// Unexpected server failure.
    InternalError,
    /// Request not allowed in the current session state.
    NotInitialized,
    /// Handshake asked for an unsupported protocol version.
    UnsupportedVersion,
    /// Unknown tool, resource or prompt.
    NotFound,
    /// Tool handler failure.
    ToolExecution,
    /// Sandbox violation or unreadable file.
    ResourceAccess,
    /// File over the size limit.
    ResourceTooLarge,
    /// Unresolved prompt slot.
    Template,
    /// Request deadline elapsed.
    Timeout,
}

impl ErrorCode {
    /// The number sent on the wire.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::NotInitialized => -32002,
            Self::UnsupportedVersion => -32001,
            Self::NotFound => -32004,
            Self::ToolExecution => -32010,
            Self::ResourceAccess => -32020,
            Self::ResourceTooLarge => -32021,
            Self::Template => -32030,
            Self::Timeout => -32040,
        }
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// Wire code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Structured detail, including the error kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// An error with `code` and `message` and no detail.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Error reply. The id is absent when the request could not be identified.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    jsonrpc: &'static str,
    /// Id of the failed request, if it could be recovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Code, message and detail.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Builds an error reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// Reply to a line that is not JSON. Never carries an id.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(
            None,
            JsonRpcErrorData::with_message(ErrorCode::ParseError, "Parse error"),
        )
    }

    /// Reply to a malformed envelope.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Invalid Request"),
        )
    }
}

/// Decodes one line.
///
/// The id is recovered before the rest of the envelope is checked, so an
/// invalid request still gets a correlated reply whenever possible.
///
/// # Errors
///
/// Returns a parse error (-32700) if the line is not a JSON object, or an
/// invalid-request error (-32600) if `jsonrpc` is not `"2.0"`, the id is
/// neither a string nor an integer, or the method is missing or empty.
pub fn parse_message(line: &str) -> Result<IncomingMessage, JsonRpcError> {
    let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(line) else {
        return Err(JsonRpcError::parse_error());
    };

    let id = match fields.remove("id") {
        None => None,
        Some(raw) => Some(
            serde_json::from_value::<RequestId>(raw)
                .map_err(|_| JsonRpcError::invalid_request(None))?,
        ),
    };

    if fields.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::invalid_request(id));
    }
    let Some(method) = take_method(&mut fields) else {
        return Err(JsonRpcError::invalid_request(id));
    };
    let params = fields.remove("params").filter(|params| !params.is_null());

    Ok(match id {
        Some(id) => IncomingMessage::Request(JsonRpcRequest { id, method, params }),
        None => IncomingMessage::Notification(JsonRpcNotification { method, params }),
    })
}

fn take_method(fields: &mut Map<String, Value>) -> Option<String> {
    match fields.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => Some(method),
        _ => None,
    }
}
