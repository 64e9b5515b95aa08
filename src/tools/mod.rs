//! Tool registry: named, schema-described callable operations.
//!
//! A [`ToolRegistry`] is an immutable snapshot. It is built once from a list
//! of [`ToolDefinition`]s (see [`ToolBuilder`]) and replaced wholesale on
//! reload, never edited in place. Invocation always validates the supplied
//! arguments against the tool's [`Schema`] before the handler runs, so a
//! rejected call never reaches handler code.

pub mod builtin;
pub mod manifest;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::resources::sandbox::Sandbox;
use crate::schema::{Schema, SchemaError, ValidationError};

/// Signature shared by every tool handler.
///
/// Handlers receive the normalised argument map (defaults applied) and
/// return a JSON result or a domain error.
pub type ToolHandler =
    Arc<dyn Fn(&ToolContext, &Map<String, Value>) -> Result<Value, ToolError> + Send + Sync>;

/// Table of handlers addressable by id, used when tools are declared in
/// manifest files.
pub type HandlerTable = IndexMap<&'static str, ToolHandler>;

/// Environment passed to handlers.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    sandbox: Option<Arc<Sandbox>>,
    tools: Option<Arc<ToolRegistry>>,
}

impl ToolContext {
    /// Creates a context whose file-reading tools are confined to `sandbox`.
    #[must_use]
    pub const fn new(sandbox: Arc<Sandbox>) -> Self {
        Self {
            sandbox: Some(sandbox),
            tools: None,
        }
    }

    /// Returns a copy of this context that can describe `tools`.
    #[must_use]
    pub fn with_tools(&self, tools: Arc<ToolRegistry>) -> Self {
        Self {
            sandbox: self.sandbox.clone(),
            tools: Some(tools),
        }
    }

    /// Returns the sandbox, or an error if file access is not configured.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] when the context was built without a sandbox.
    pub fn sandbox(&self) -> Result<&Sandbox, ToolError> {
        self.sandbox
            .as_deref()
            .ok_or_else(|| ToolError::new("file access is not configured"))
    }

    /// Returns the registry snapshot the current call runs against.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] when no registry was attached.
    pub fn tools(&self) -> Result<&ToolRegistry, ToolError> {
        self.tools
            .as_deref()
            .ok_or_else(|| ToolError::new("tool registry is not available"))
    }
}

/// A domain failure reported by a tool handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolError {
    message: String,
}

impl ToolError {
    /// Creates a new handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The handler-provided message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised by [`ToolRegistry::invoke`].
#[derive(Debug, Error)]
pub enum InvokeError {
    /// No tool with this name is published.
    #[error("unknown tool: {0}")]
    NotFound(String),

    /// Arguments failed schema validation; the handler was not called.
    #[error("invalid arguments for tool '{tool}': {source}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// Field-level detail.
        #[source]
        source: ValidationError,
    },

    /// The handler ran and reported a failure.
    #[error("tool '{tool}' failed: {source}")]
    Execution {
        /// Tool name.
        tool: String,
        /// Handler-provided error.
        #[source]
        source: ToolError,
    },
}

/// Errors raised while building a registry snapshot.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two definitions share a name.
    #[error("duplicate tool name: {0}")]
    DuplicateName(String),

    /// A definition has an empty name.
    #[error("tool name cannot be empty")]
    EmptyName,

    /// A definition has no handler attached.
    #[error("tool '{0}' has no handler")]
    MissingHandler(String),

    /// A manifest references a handler id that is not registered.
    #[error("tool '{tool}' references unknown handler '{handler}'")]
    UnknownHandler {
        /// Tool name.
        tool: String,
        /// Handler id from the manifest.
        handler: String,
    },

    /// A parameter schema is malformed.
    #[error("tool '{tool}' has an invalid parameter schema")]
    InvalidSchema {
        /// Tool name.
        tool: String,
        /// The schema problem.
        #[source]
        source: SchemaError,
    },

    /// A manifest file could not be read or parsed.
    #[error("invalid tool manifest {path}: {message}")]
    Manifest {
        /// Manifest file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
}

/// A published tool: metadata, parameter schema and handler.
#[derive(Clone)]
pub struct ToolDefinition {
    name: String,
    description: String,
    category: String,
    schema: Schema,
    handler: ToolHandler,
}

impl ToolDefinition {
    /// Tool name (unique key).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Category tag.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Parameter schema.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Listing view of this definition.
    #[must_use]
    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_value(),
            category: self.category.clone(),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// A tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
    /// Category tag.
    pub category: String,
}

/// Registration call for a single tool.
///
/// ```
/// use mcp_learning_server::tools::ToolBuilder;
/// use serde_json::{json, Value};
///
/// let tool = ToolBuilder::new("ping_back")
///     .description("Returns its input")
///     .category("utility")
///     .parameters(json!({"type": "object", "properties": {"x": {"type": "string"}}}))
///     .handler(|_, args| Ok(args.get("x").cloned().unwrap_or(Value::Null)))
///     .build()
///     .unwrap();
/// assert_eq!(tool.name(), "ping_back");
/// ```
#[must_use]
pub struct ToolBuilder {
    name: String,
    description: String,
    category: String,
    parameters: Value,
    handler: Option<ToolHandler>,
}

impl ToolBuilder {
    /// Starts a registration for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: "general".to_string(),
            parameters: serde_json::json!({"type": "object"}),
            handler: None,
        }
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the category tag (default `general`).
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the parameter schema declaration.
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attaches a handler closure.
    pub fn handler<F>(self, handler: F) -> Self
    where
        F: Fn(&ToolContext, &Map<String, Value>) -> Result<Value, ToolError>
            + Send
            + Sync
            + 'static,
    {
        self.shared_handler(Arc::new(handler))
    }

    /// Attaches an already shared handler.
    pub fn shared_handler(mut self, handler: ToolHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Finishes the registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, no handler was attached or
    /// the parameter schema is malformed.
    pub fn build(self) -> Result<ToolDefinition, RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let handler = self
            .handler
            .ok_or_else(|| RegistryError::MissingHandler(self.name.clone()))?;
        let schema =
            Schema::from_value(self.parameters).map_err(|source| RegistryError::InvalidSchema {
                tool: self.name.clone(),
                source,
            })?;
        Ok(ToolDefinition {
            name: self.name,
            description: self.description,
            category: self.category,
            schema,
            handler,
        })
    }
}

/// Immutable snapshot of the published tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolDefinition>,
}

impl ToolRegistry {
    /// Builds a snapshot, preserving the order of `definitions`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if two definitions share a
    /// name; nothing is published in that case.
    pub fn build(definitions: Vec<ToolDefinition>) -> Result<Self, RegistryError> {
        let mut tools = IndexMap::with_capacity(definitions.len());
        for definition in definitions {
            if tools.contains_key(&definition.name) {
                return Err(RegistryError::DuplicateName(definition.name));
            }
            tools.insert(definition.name.clone(), definition);
        }
        Ok(Self { tools })
    }

    /// Lists published tools in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools.values().map(ToolDefinition::summary).collect()
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Tool names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Number of published tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validates `arguments` and calls the tool's handler.
    ///
    /// # Errors
    ///
    /// - [`InvokeError::NotFound`] for an unknown name
    /// - [`InvokeError::InvalidArguments`] if validation fails (the handler
    ///   is not called)
    /// - [`InvokeError::Execution`] if the handler reports a failure
    pub fn invoke(
        &self,
        context: &ToolContext,
        name: &str,
        arguments: &Value,
    ) -> Result<Value, InvokeError> {
        let tool = self
            .get(name)
            .ok_or_else(|| InvokeError::NotFound(name.to_string()))?;

        let normalised = match tool.schema.validate(arguments) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(source) => {
                tracing::debug!(tool = name, error = %source, "Rejected tool arguments");
                return Err(InvokeError::InvalidArguments {
                    tool: name.to_string(),
                    source,
                });
            }
        };

        (tool.handler)(context, &normalised).map_err(|source| {
            tracing::debug!(tool = name, error = %source, "Tool handler failed");
            InvokeError::Execution {
                tool: name.to_string(),
                source,
            }
        })
    }
}

/// Builds the tool snapshot for startup or reload.
///
/// When `tools_dir` names an existing directory the snapshot comes from
/// its manifests; otherwise the built-in tool table is published.
///
/// # Errors
///
/// Returns an error if any definition is invalid.
pub fn load(tools_dir: Option<&Path>) -> Result<ToolRegistry, RegistryError> {
    match tools_dir {
        Some(dir) if dir.is_dir() => manifest::load_dir(dir, &builtin::handlers()),
        _ => builtin::registry(),
    }
}
