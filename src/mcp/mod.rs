//! Model Context Protocol (MCP) server implementation.
//!
//! This module implements the MCP request/response discipline for exposing
//! tools, resources and prompts to a single client. The server communicates
//! over stdio transport using newline-delimited JSON-RPC 2.0 messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │  Transport  │───▶│ Dispatcher  │───▶│ Worker pool  │     │
//! │   │   (stdio)   │    │  (session)  │    │ (registries) │     │
//! │   └─────────────┘    └─────────────┘    └──────────────┘     │
//! │          ▲                  │                  │             │
//! │          │                  ▼                  ▼             │
//! │   ┌──────────────────────────────────────────────────┐       │
//! │   │            Writer task (one line each)           │       │
//! │   └──────────────────────────────────────────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! The handshake accepts any version listed in
//! [`protocol::SUPPORTED_PROTOCOL_VERSIONS`] and echoes it back.

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod transport;

pub use dispatcher::{Dispatcher, Route, SessionState};
pub use error::McpError;
pub use metrics::{MetricsSnapshot, RequestMetrics};
pub use protocol::{JsonRpcError, JsonRpcResponse};
pub use server::{McpServer, ServerOptions};
pub use transport::{FramedReader, FramedWriter};
