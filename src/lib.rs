//! mcp-learning-server: an MCP server for tools, resources and prompts
//!
//! This library implements a Model Context Protocol server that exposes
//! three kinds of capability to a single client over stdio:
//!
//! - **Tools**: named operations whose arguments are validated against a
//!   declared schema before the handler runs
//! - **Resources**: read-only files addressed by id, confined to a sandbox
//!   root and served through a bounded LRU cache
//! - **Prompts**: parameterised text templates rendered on request
//!
//! Each registry is published as an immutable snapshot. With hot reload
//! enabled, a file watcher rebuilds a registry from its directory and swaps
//! the snapshot in one step, so requests in flight are never affected.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Startup and configuration error types
//! - [`mcp`] - MCP protocol, session state machine and transport loop
//! - [`schema`] - Parameter schemas and argument validation
//! - [`tools`] - Tool registry, built-in tools and manifests
//! - [`resources`] - Resource catalog, sandbox and content cache
//! - [`prompts`] - Prompt registry and template rendering
//! - [`reload`] - Snapshot publication and the directory watcher

pub mod config;
pub mod error;
pub mod mcp;
pub mod prompts;
pub mod reload;
pub mod resources;
pub mod schema;
pub mod tools;
