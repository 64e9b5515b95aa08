//! Session state machine and request routing.
//!
//! The [`Dispatcher`] owns the [`Session`] and decides, for each decoded
//! message, whether it can be answered immediately (handshake, ping,
//! shutdown, state violations) or must be handed to the worker pool as a
//! [`Job`]. Jobs carry their own handle to the published registries and
//! load a snapshot when they run, so a reload that lands while a job is
//! queued or running never changes what that job sees.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::error::McpError;
use crate::mcp::protocol::{
    is_supported_version, IncomingMessage, JsonRpcNotification, JsonRpcRequest, RequestId,
    SERVER_NAME,
};
use crate::reload::Registries;
use crate::resources::ResourceFilter;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a successful `initialize`.
    Uninitialized,
    /// Handshake complete; registry requests are accepted.
    Ready,
    /// Terminal. Nothing further is accepted.
    Closed,
}

/// Per-connection session data.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    protocol_version: Option<String>,
    client_capabilities: Value,
    client_info: Option<ClientInfo>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            protocol_version: None,
            client_capabilities: Value::Null,
            client_info: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Protocol version agreed during the handshake.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Capabilities the client advertised.
    #[must_use]
    pub const fn client_capabilities(&self) -> &Value {
        &self.client_capabilities
    }

    /// Client name and version, if sent.
    #[must_use]
    pub const fn client_info(&self) -> Option<&ClientInfo> {
        self.client_info.as_ref()
    }
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    pub tools: ListCapability,
    /// Resource-related capabilities.
    pub resources: ListCapability,
    /// Prompt-related capabilities.
    pub prompts: ListCapability,
}

impl ServerCapabilities {
    fn new(list_changed: bool) -> Self {
        let capability = ListCapability { list_changed };
        Self {
            tools: capability.clone(),
            resources: capability.clone(),
            prompts: capability,
        }
    }
}

/// Capabilities of one registry family.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListCapability {
    /// Whether the list can change during the session.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: String,
    #[serde(default)]
    capabilities: Value,
    #[serde(default)]
    client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ResourceListParams {
    #[serde(default)]
    filter: Option<ResourceFilter>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResourceReadParams {
    #[serde(alias = "uri")]
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PromptGetParams {
    #[serde(alias = "name")]
    id: String,
    #[serde(default)]
    arguments: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a successful `tools/call`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    /// Value returned by the handler.
    pub result: Value,
    /// The same value rendered as text.
    pub content: Vec<ToolContent>,
}

impl ToolCallResult {
    fn new(result: Value) -> Self {
        let text = match &result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            result,
            content: vec![ToolContent::Text { text }],
        }
    }
}

/// What the transport loop should do with a message.
#[derive(Debug)]
pub enum Route {
    /// Answer immediately.
    Reply(RequestId, Result<Value, McpError>),
    /// Run on the worker pool, then answer.
    Work(Job),
    /// Notification; nothing to send.
    Ignore,
}

#[derive(Debug)]
enum JobKind {
    ToolsList,
    ToolsCall { name: String, arguments: Value },
    ResourcesList(ResourceFilter),
    ResourcesRead(String),
    PromptsList,
    PromptsGet { id: String, arguments: Value },
}

/// A registry request waiting for a worker.
#[derive(Debug)]
pub struct Job {
    id: RequestId,
    kind: JobKind,
    registries: Arc<Registries>,
}

impl Job {
    /// Correlation id of the originating request.
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.id
    }

    /// Method name, for logging.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self.kind {
            JobKind::ToolsList => "tools/list",
            JobKind::ToolsCall { .. } => "tools/call",
            JobKind::ResourcesList(_) => "resources/list",
            JobKind::ResourcesRead(_) => "resources/read",
            JobKind::PromptsList => "prompts/list",
            JobKind::PromptsGet { .. } => "prompts/get",
        }
    }

    /// Tool name for `tools/call` jobs.
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        match &self.kind {
            JobKind::ToolsCall { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Executes the request against the currently published snapshots.
    ///
    /// Synchronous: tool handlers and file reads block, so the server runs
    /// this on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns the request's failure, already mapped to an [`McpError`].
    pub fn run(self) -> Result<Value, McpError> {
        let registries = &self.registries;
        match self.kind {
            JobKind::ToolsList => Ok(json!({ "tools": registries.tools.load().list() })),
            JobKind::ToolsCall { name, arguments } => {
                let tools = registries.tools.load();
                let context = registries.tool_context().with_tools(Arc::clone(&tools));
                let value = tools.invoke(&context, &name, &arguments)?;
                to_value(&ToolCallResult::new(value))
            }
            JobKind::ResourcesList(filter) => {
                Ok(json!({ "resources": registries.resources.list(&filter) }))
            }
            JobKind::ResourcesRead(id) => Ok(registries.resources.read(&id)?.to_value()),
            JobKind::PromptsList => Ok(json!({ "prompts": registries.prompts.load().list() })),
            JobKind::PromptsGet { id, arguments } => {
                let rendered = registries.prompts.load().render(&id, &arguments)?;
                to_value(&rendered)
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise result");
        McpError::Internal("failed to serialise result".to_string())
    })
}

/// Parses request params, treating absent params as an empty object.
fn parse_params<T: DeserializeOwned>(params: Option<Value>, method: &str) -> Result<T, McpError> {
    let params = match params {
        None | Some(Value::Null) => json!({}),
        Some(params) => params,
    };
    serde_json::from_value(params)
        .map_err(|e| McpError::invalid_params(format!("Invalid {method} params: {e}")))
}

fn job_kind(method: &str, params: Option<Value>) -> Result<Option<JobKind>, McpError> {
    let kind = match method {
        "tools/list" => JobKind::ToolsList,
        "tools/call" => {
            let params: ToolCallParams = parse_params(params, method)?;
            JobKind::ToolsCall {
                name: params.name,
                arguments: params.arguments,
            }
        }
        "resources/list" => {
            let params: ResourceListParams = parse_params(params, method)?;
            JobKind::ResourcesList(params.filter.unwrap_or_default())
        }
        "resources/read" => {
            let params: ResourceReadParams = parse_params(params, method)?;
            JobKind::ResourcesRead(params.id)
        }
        "prompts/list" => JobKind::PromptsList,
        "prompts/get" => {
            let params: PromptGetParams = parse_params(params, method)?;
            JobKind::PromptsGet {
                id: params.id,
                arguments: params.arguments,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

/// Routes messages according to the session state.
#[derive(Debug)]
pub struct Dispatcher {
    session: Session,
    registries: Arc<Registries>,
    list_changed: bool,
}

impl Dispatcher {
    /// Creates a dispatcher with a fresh session.
    ///
    /// `list_changed` is advertised in the capabilities and should be
    /// `true` when hot reload is enabled.
    #[must_use]
    pub fn new(registries: Arc<Registries>, list_changed: bool) -> Self {
        Self {
            session: Session::new(),
            registries,
            list_changed,
        }
    }

    /// The session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Current session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.session.state
    }

    /// Marks the session closed, e.g. on transport EOF.
    pub fn close(&mut self) {
        if self.session.state != SessionState::Closed {
            tracing::debug!("Session closed");
        }
        self.session.state = SessionState::Closed;
    }

    /// Decides how to handle `message`.
    pub fn dispatch(&mut self, message: IncomingMessage) -> Route {
        match message {
            IncomingMessage::Request(request) => self.dispatch_request(request),
            IncomingMessage::Notification(notification) => {
                self.handle_notification(&notification);
                Route::Ignore
            }
        }
    }

    fn dispatch_request(&mut self, request: JsonRpcRequest) -> Route {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        tracing::debug!(%id, method = %method, state = ?self.session.state, "Dispatching request");

        match (self.session.state, method.as_str()) {
            (SessionState::Closed, _) => Route::Reply(id, Err(McpError::Closed)),
            (_, "ping") => Route::Reply(id, Ok(json!({}))),
            (SessionState::Uninitialized, "initialize") => {
                let result = self.handle_initialize(params);
                Route::Reply(id, result)
            }
            (SessionState::Uninitialized, _) => Route::Reply(id, Err(McpError::NotInitialized)),
            (SessionState::Ready, "initialize") => Route::Reply(
                id,
                Err(McpError::Protocol("Server already initialized".to_string())),
            ),
            (SessionState::Ready, "shutdown") => {
                tracing::info!("Shutdown requested by client");
                self.session.state = SessionState::Closed;
                Route::Reply(id, Ok(json!({})))
            }
            (SessionState::Ready, _) => match job_kind(&method, params) {
                Ok(Some(kind)) => Route::Work(Job {
                    id,
                    kind,
                    registries: Arc::clone(&self.registries),
                }),
                Ok(None) => Route::Reply(id, Err(McpError::MethodNotFound(method))),
                Err(error) => Route::Reply(id, Err(error)),
            },
        }
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, McpError> {
        if params.is_none() {
            return Err(McpError::invalid_params("Missing initialize params"));
        }
        let params: InitializeParams = parse_params(params, "initialize")?;

        if !is_supported_version(&params.protocol_version) {
            tracing::warn!(
                requested = %params.protocol_version,
                "Rejecting unsupported protocol version"
            );
            return Err(McpError::Negotiation {
                requested: params.protocol_version,
            });
        }

        if let Some(client) = &params.client_info {
            tracing::info!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                protocol = %params.protocol_version,
                "Client initialized"
            );
        }

        let result = json!({
            "protocolVersion": params.protocol_version,
            "capabilities": ServerCapabilities::new(self.list_changed),
            "serverInfo": ServerInfo::default(),
        });

        self.session.protocol_version = Some(params.protocol_version);
        self.session.client_capabilities = params.capabilities;
        self.session.client_info = params.client_info;
        self.session.state = SessionState::Ready;
        Ok(result)
    }

    fn handle_notification(&mut self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => tracing::debug!("Client confirmed initialisation"),
            "notifications/cancelled" => {
                tracing::debug!(params = ?notification.params, "Client cancelled a request");
            }
            "exit" => self.close(),
            other => tracing::debug!(method = other, "Ignoring notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::parse_message;
    use crate::prompts::PromptRegistry;
    use crate::resources::{CacheLimits, ResourceCatalog, ResourceIndex, Sandbox};
    use crate::tools::builtin;

    fn registries(root: &std::path::Path) -> Arc<Registries> {
        let sandbox = Arc::new(Sandbox::new(root).unwrap());
        let catalog = ResourceCatalog::new(
            sandbox,
            ResourceIndex::default(),
            CacheLimits {
                max_bytes: 1024,
                max_resource_size: 1024,
            },
        );
        Arc::new(Registries::new(
            builtin::registry().unwrap(),
            catalog,
            PromptRegistry::default(),
        ))
    }

    fn request(id: i64, method: &str, params: Value) -> IncomingMessage {
        let line = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        parse_message(&line.to_string()).unwrap()
    }

    fn reply(route: Route) -> Result<Value, McpError> {
        match route {
            Route::Reply(_, result) => result,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    fn initialize(dispatcher: &mut Dispatcher) {
        let route = dispatcher.dispatch(request(
            0,
            "initialize",
            json!({"protocolVersion": "2024-11-05", "capabilities": {}}),
        ));
        reply(route).unwrap();
    }

    #[test]
    fn requests_before_handshake_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);

        for method in ["tools/list", "tools/call", "resources/read", "prompts/get"] {
            let error = reply(dispatcher.dispatch(request(1, method, json!({})))).unwrap_err();
            assert!(matches!(error, McpError::NotInitialized), "{method}");
            assert_eq!(dispatcher.state(), SessionState::Uninitialized);
        }
    }

    #[test]
    fn ping_is_allowed_before_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);

        let result = reply(dispatcher.dispatch(request(1, "ping", Value::Null))).unwrap();
        assert_eq!(result, json!({}));
        assert_eq!(dispatcher.state(), SessionState::Uninitialized);
    }

    #[test]
    fn unsupported_version_keeps_session_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);

        let error = reply(dispatcher.dispatch(request(
            1,
            "initialize",
            json!({"protocolVersion": "1999-01-01"}),
        )))
        .unwrap_err();
        assert!(matches!(error, McpError::Negotiation { .. }));
        assert_eq!(dispatcher.state(), SessionState::Uninitialized);
    }

    #[test]
    fn handshake_records_session_and_advertises_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), true);

        let result = reply(dispatcher.dispatch(request(
            1,
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {"sampling": {}},
                "clientInfo": {"name": "test-client", "version": "1.0"}
            }),
        )))
        .unwrap();

        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(dispatcher.state(), SessionState::Ready);
        assert_eq!(dispatcher.session().protocol_version(), Some("2025-03-26"));
        assert_eq!(dispatcher.session().client_info().unwrap().name, "test-client");
        assert!(dispatcher.session().client_capabilities()["sampling"].is_object());
    }

    #[test]
    fn second_initialize_is_a_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);
        initialize(&mut dispatcher);

        let error = reply(dispatcher.dispatch(request(
            2,
            "initialize",
            json!({"protocolVersion": "2024-11-05"}),
        )))
        .unwrap_err();
        assert!(matches!(error, McpError::Protocol(_)));
        assert_eq!(dispatcher.state(), SessionState::Ready);
    }

    #[test]
    fn registry_requests_become_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);
        initialize(&mut dispatcher);

        let route = dispatcher.dispatch(request(
            7,
            "tools/call",
            json!({"name": "calculator", "arguments": {"operation": "add", "a": 15, "b": 27}}),
        ));
        let Route::Work(job) = route else {
            panic!("expected a job");
        };
        assert_eq!(job.id(), &RequestId::Number(7));
        assert_eq!(job.method(), "tools/call");

        let result = job.run().unwrap();
        assert_eq!(result["result"], json!(42));
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "42");
    }

    #[test]
    fn malformed_params_are_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);
        initialize(&mut dispatcher);

        let error = reply(dispatcher.dispatch(request(3, "tools/call", json!({"arguments": {}}))))
            .unwrap_err();
        assert!(matches!(error, McpError::InvalidArguments { .. }));

        let error = reply(dispatcher.dispatch(request(
            4,
            "resources/list",
            json!({"filter": {"colour": "red"}}),
        )))
        .unwrap_err();
        assert!(matches!(error, McpError::InvalidArguments { .. }));
    }

    #[test]
    fn unknown_method_after_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);
        initialize(&mut dispatcher);

        let error = reply(dispatcher.dispatch(request(5, "sampling/create", json!({}))))
            .unwrap_err();
        assert!(matches!(error, McpError::MethodNotFound(ref m) if m == "sampling/create"));
    }

    #[test]
    fn shutdown_closes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);
        initialize(&mut dispatcher);

        let result = reply(dispatcher.dispatch(request(8, "shutdown", Value::Null))).unwrap();
        assert_eq!(result, json!({}));
        assert_eq!(dispatcher.state(), SessionState::Closed);

        let error = reply(dispatcher.dispatch(request(9, "ping", Value::Null))).unwrap_err();
        assert!(matches!(error, McpError::Closed));
    }

    #[test]
    fn notifications_are_never_answered() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(registries(dir.path()), false);

        let message =
            parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(dispatcher.dispatch(message), Route::Ignore));
        assert_eq!(dispatcher.state(), SessionState::Uninitialized);
    }
}
