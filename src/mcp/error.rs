//! Request-level errors reported to the client.
//!
//! Every failure of a single request becomes an [`McpError`], which maps to
//! a stable JSON-RPC code and a `data.kind` name. None of them end the
//! session.

use std::time::Duration;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, JsonRpcError, JsonRpcErrorData, RequestId};
use crate::prompts::PromptError;
use crate::resources::ResourceError;
use crate::schema::ValidationError;
use crate::tools::InvokeError;

/// A failed request.
#[derive(Debug, Error)]
pub enum McpError {
    /// Malformed request for the current state.
    #[error("{0}")]
    Protocol(String),

    /// A request other than the handshake arrived before initialisation.
    #[error("Server not initialized")]
    NotInitialized,

    /// The session has been closed.
    #[error("Session closed")]
    Closed,

    /// The client asked for a protocol version this server does not speak.
    #[error("Unsupported protocol version: {requested}")]
    Negotiation {
        /// Version sent by the client.
        requested: String,
    },

    /// Unknown method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Request parameters were missing or malformed.
    #[error("{message}")]
    InvalidArguments {
        /// Human-readable description.
        message: String,
        /// Field-level detail from schema validation.
        detail: Option<ValidationError>,
    },

    /// No tool, resource or prompt with this id.
    #[error("{what} not found: {id}")]
    NotFound {
        /// `tool`, `resource` or `prompt`.
        what: &'static str,
        /// Requested id.
        id: String,
    },

    /// The tool handler reported a failure.
    #[error("{message}")]
    ToolExecution {
        /// Tool name.
        tool: String,
        /// Handler-provided message.
        message: String,
    },

    /// Sandbox violation or unreadable backing file.
    #[error("{0}")]
    ResourceAccess(String),

    /// The resource exceeds the configured size limit.
    #[error("Resource too large: {size} bytes (max: {limit} bytes)")]
    ResourceTooLarge {
        /// File size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// A prompt slot had no value.
    #[error("Unresolved template slot: {slot}")]
    Template {
        /// Slot name.
        slot: String,
    },

    /// The request exceeded the configured deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Unexpected server-side failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Creates an [`McpError::InvalidArguments`] without field detail.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
            detail: None,
        }
    }

    /// The JSON-RPC error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Protocol(_) => ErrorCode::InvalidRequest,
            Self::NotInitialized | Self::Closed => ErrorCode::NotInitialized,
            Self::Negotiation { .. } => ErrorCode::UnsupportedVersion,
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
            Self::InvalidArguments { .. } => ErrorCode::InvalidParams,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::ToolExecution { .. } => ErrorCode::ToolExecution,
            Self::ResourceAccess(_) => ErrorCode::ResourceAccess,
            Self::ResourceTooLarge { .. } => ErrorCode::ResourceTooLarge,
            Self::Template { .. } => ErrorCode::Template,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// The stable kind name carried in `error.data.kind`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) | Self::NotInitialized | Self::Closed => "ProtocolError",
            Self::Negotiation { .. } => "NegotiationError",
            Self::MethodNotFound(_) => "MethodNotFound",
            Self::InvalidArguments { .. } => "InvalidArgumentsError",
            Self::NotFound { .. } => "NotFoundError",
            Self::ToolExecution { .. } => "ToolExecutionError",
            Self::ResourceAccess(_) => "ResourceAccessError",
            Self::ResourceTooLarge { .. } => "ResourceTooLargeError",
            Self::Template { .. } => "TemplateError",
            Self::Timeout(_) => "TimeoutError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Builds the JSON-RPC error object.
    #[must_use]
    pub fn to_error_data(&self) -> JsonRpcErrorData {
        let mut data = Map::new();
        data.insert("kind".to_string(), json!(self.kind()));
        match self {
            Self::Negotiation { .. } => {
                data.insert(
                    "supported".to_string(),
                    json!(crate::mcp::protocol::SUPPORTED_PROTOCOL_VERSIONS),
                );
            }
            Self::InvalidArguments {
                detail: Some(detail),
                ..
            } => {
                data.insert("field".to_string(), json!(detail.field));
                data.insert("constraint".to_string(), json!(detail.violation.constraint()));
            }
            Self::NotFound { what, id } => {
                data.insert((*what).to_string(), json!(id));
            }
            Self::ToolExecution { tool, .. } => {
                data.insert("tool".to_string(), json!(tool));
            }
            Self::ResourceTooLarge { size, limit } => {
                data.insert("size".to_string(), json!(size));
                data.insert("limit".to_string(), json!(limit));
            }
            Self::Template { slot } => {
                data.insert("slot".to_string(), json!(slot));
            }
            _ => {}
        }
        JsonRpcErrorData::with_message(self.code(), self.to_string()).with_data(Value::Object(data))
    }

    /// Builds the error response for request `id`.
    #[must_use]
    pub fn into_response(self, id: Option<RequestId>) -> JsonRpcError {
        JsonRpcError::new(id, self.to_error_data())
    }
}

impl From<InvokeError> for McpError {
    fn from(error: InvokeError) -> Self {
        match error {
            InvokeError::NotFound(id) => Self::NotFound { what: "tool", id },
            InvokeError::InvalidArguments { ref source, .. } => Self::InvalidArguments {
                message: error.to_string(),
                detail: Some(source.clone()),
            },
            InvokeError::Execution { tool, source } => Self::ToolExecution {
                tool,
                message: source.message().to_string(),
            },
        }
    }
}

impl From<ResourceError> for McpError {
    fn from(error: ResourceError) -> Self {
        match error {
            ResourceError::NotFound(id) => Self::NotFound {
                what: "resource",
                id,
            },
            ResourceError::TooLarge { size, limit, .. } => Self::ResourceTooLarge { size, limit },
            ResourceError::Access { .. } | ResourceError::Io { .. } => {
                Self::ResourceAccess(error.to_string())
            }
            ResourceError::Index { .. } => Self::Internal(error.to_string()),
        }
    }
}

impl From<PromptError> for McpError {
    fn from(error: PromptError) -> Self {
        match error {
            PromptError::NotFound(id) => Self::NotFound { what: "prompt", id },
            PromptError::InvalidArguments { ref source, .. } => Self::InvalidArguments {
                message: error.to_string(),
                detail: Some(source.clone()),
            },
            PromptError::Template { slot, .. } => Self::Template { slot },
            PromptError::Definition { .. } | PromptError::Load { .. } => {
                Self::Internal(error.to_string())
            }
        }
    }
}
