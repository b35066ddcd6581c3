//! Server role
//!
//! A [`ServerRole`] answers the handshake, exposes a registry of tools,
//! resources and prompts, and can delegate LLM sampling back to the client.
//!
//! Inbound requests are parsed into a closed [`Operation`] set. Each
//! operation is checked against the negotiated capabilities before it
//! reaches the registry:
//!
//! | Condition                         | Reply                         |
//! |-----------------------------------|-------------------------------|
//! | unknown method                    | `-32601` method not found     |
//! | handshake not completed           | `-32011` not negotiated       |
//! | capability outside negotiated set | `-32010` capability not granted |
//! | malformed params, unknown name    | `-32602` invalid params       |
//!
//! Tool handlers receive a [`ToolContext`] whose [`SamplingRequester`]
//! issues `sampling/createMessage` on the same session while the tool's own
//! response is still pending.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{McpError, Result};
use crate::mcp::codec::{Notification, RequestId};
use crate::mcp::negotiation::{is_initialized_notification, NegotiationState, Negotiator};
use crate::mcp::session::{BoxFuture, InboundRequest, Session, SessionConfig};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, CallToolResult, CapabilitySet, Content, CreateMessageRequest,
    GetPromptParams, GetPromptResult, Implementation, InitializeParams, ListPromptsResult,
    ListResourcesResult, ListToolsResult, PaginatedParams, Prompt, PromptMessage,
    ReadResourceParams, ReadResourceResult, Resource, ResourceContents, Role, SamplingResult,
    ToolDefinition, METHOD_INITIALIZE, METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST,
    METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_SAMPLING_CREATE_MESSAGE,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

/// Every request a server answers after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `ping`
    Ping,
    /// `tools/list`
    ListTools(PaginatedParams),
    /// `tools/call`
    CallTool(CallToolParams),
    /// `resources/list`
    ListResources(PaginatedParams),
    /// `resources/read`
    ReadResource(ReadResourceParams),
    /// `prompts/list`
    ListPrompts(PaginatedParams),
    /// `prompts/get`
    GetPrompt(GetPromptParams),
}

impl Operation {
    /// Capability gating `method`, or `Ok(None)` for ungated methods.
    ///
    /// # Errors
    ///
    /// [`McpError::MethodNotFound`] when the method is not served.
    pub fn capability_of(method: &str) -> Result<Option<&'static str>> {
        match method {
            METHOD_PING => Ok(None),
            METHOD_TOOLS_LIST | METHOD_TOOLS_CALL => Ok(Some("tools")),
            METHOD_RESOURCES_LIST | METHOD_RESOURCES_READ => Ok(Some("resources")),
            METHOD_PROMPTS_LIST | METHOD_PROMPTS_GET => Ok(Some("prompts")),
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    /// Parse a request into an operation.
    ///
    /// # Errors
    ///
    /// [`McpError::MethodNotFound`] for unknown methods and
    /// [`McpError::InvalidParams`] for params of the wrong shape.
    pub fn parse(method: &str, params: Option<Value>) -> Result<Self> {
        Ok(match method {
            METHOD_PING => Operation::Ping,
            METHOD_TOOLS_LIST => Operation::ListTools(optional_params(params)?),
            METHOD_TOOLS_CALL => Operation::CallTool(required_params(params)?),
            METHOD_RESOURCES_LIST => Operation::ListResources(optional_params(params)?),
            METHOD_RESOURCES_READ => Operation::ReadResource(required_params(params)?),
            METHOD_PROMPTS_LIST => Operation::ListPrompts(optional_params(params)?),
            METHOD_PROMPTS_GET => Operation::GetPrompt(required_params(params)?),
            other => return Err(McpError::MethodNotFound(other.to_string())),
        })
    }

    /// Wire name of this operation.
    pub fn method(&self) -> &'static str {
        match self {
            Operation::Ping => METHOD_PING,
            Operation::ListTools(_) => METHOD_TOOLS_LIST,
            Operation::CallTool(_) => METHOD_TOOLS_CALL,
            Operation::ListResources(_) => METHOD_RESOURCES_LIST,
            Operation::ReadResource(_) => METHOD_RESOURCES_READ,
            Operation::ListPrompts(_) => METHOD_PROMPTS_LIST,
            Operation::GetPrompt(_) => METHOD_PROMPTS_GET,
        }
    }
}

fn optional_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| McpError::InvalidParams(e.to_string()))
        }
    }
}

fn required_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let value = params.ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(value).map_err(|e| McpError::InvalidParams(e.to_string()))
}

/// Sends `sampling/createMessage` to the client on the server's session.
#[derive(Debug, Clone)]
pub struct SamplingRequester {
    negotiator: Negotiator,
}

impl SamplingRequester {
    /// Ask the client for a completion.
    ///
    /// A consent denial arrives as [`SamplingResult::Refused`], not an
    /// error.
    ///
    /// # Errors
    ///
    /// [`McpError::NotNegotiated`] before the handshake completes,
    /// [`McpError::CapabilityNotGranted`] when sampling was not negotiated
    /// (nothing is sent), and any failure reported by the client, such as
    /// [`McpError::SamplingBackend`].
    pub async fn create_message(&self, request: CreateMessageRequest) -> Result<SamplingResult> {
        self.negotiator.require("sampling")?;
        let reply = self
            .negotiator
            .session()
            .request(
                METHOD_SAMPLING_CREATE_MESSAGE,
                Some(serde_json::to_value(&request)?),
            )
            .await?;
        Ok(serde_json::from_value(reply)?)
    }
}

/// Passed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Id of the `tools/call` request being served.
    pub request_id: RequestId,
    /// Delegates generation to the client.
    pub sampler: SamplingRequester,
}

/// A tool exposed through `tools/list` and `tools/call`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Metadata advertised by `tools/list`.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool.
    ///
    /// Return `Ok(CallToolResult::error(..))` for failures the caller
    /// should read as tool output; `Err` becomes a JSON-RPC error.
    async fn call(&self, arguments: Value, context: ToolContext) -> Result<CallToolResult>;
}

/// Tool that forwards its `prompt` argument to the client's model.
///
/// A refusal is reported as a tool error result carrying the reason.
#[derive(Debug, Clone)]
pub struct DelegatingTool {
    name: String,
    system_prompt: Option<String>,
    max_tokens: u32,
}

impl DelegatingTool {
    /// A delegating tool called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: None,
            max_tokens: 256,
        }
    }

    /// System prompt attached to every delegated request.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Token budget of every delegated request.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl ToolHandler for DelegatingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            title: None,
            description: Some("Ask the client's language model to answer a prompt".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "Text to send to the model"}
                },
                "required": ["prompt"]
            }),
        }
    }

    async fn call(&self, arguments: Value, context: ToolContext) -> Result<CallToolResult> {
        let prompt = arguments
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::InvalidParams("missing string argument 'prompt'".into()))?;

        let mut request = CreateMessageRequest::new(prompt, self.max_tokens);
        request.system_prompt = self.system_prompt.clone();

        tracing::debug!(tool = %self.name, id = %context.request_id, "delegating sampling to client");
        match context.sampler.create_message(request).await? {
            SamplingResult::Completed(result) => Ok(CallToolResult {
                content: vec![result.content.clone()],
                is_error: None,
                structured_content: Some(serde_json::to_value(&result)?),
            }),
            SamplingResult::Refused(refusal) => Ok(CallToolResult::error(format!(
                "sampling refused: {}",
                refusal.reason
            ))),
        }
    }
}

/// A resource with fixed contents.
#[derive(Debug, Clone)]
pub struct StaticResource {
    /// Metadata advertised by `resources/list`.
    pub resource: Resource,
    /// Returned by `resources/read`.
    pub contents: ResourceContents,
}

/// A prompt whose messages are rendered from `{{argument}}` templates.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// Metadata advertised by `prompts/list`.
    pub prompt: Prompt,
    /// Message templates in order.
    pub messages: Vec<(Role, String)>,
}

impl PromptTemplate {
    fn render(&self, arguments: &HashMap<String, String>) -> Result<GetPromptResult> {
        for argument in &self.prompt.arguments {
            if argument.required.unwrap_or(false) && !arguments.contains_key(&argument.name) {
                return Err(McpError::InvalidParams(format!(
                    "prompt '{}' requires argument '{}'",
                    self.prompt.name, argument.name
                )));
            }
        }
        let messages = self
            .messages
            .iter()
            .map(|(role, template)| {
                let text = arguments.iter().fold(template.clone(), |text, (name, value)| {
                    text.replace(&format!("{{{{{name}}}}}"), value)
                });
                PromptMessage {
                    role: *role,
                    content: Content::text(text),
                }
            })
            .collect();
        Ok(GetPromptResult {
            description: self.prompt.description.clone(),
            messages,
        })
    }
}

/// Tools, resources and prompts served by a [`ServerRole`], keyed by name
/// (URI for resources) and listed in key order.
#[derive(Default)]
pub struct ServerRegistry {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
    resources: BTreeMap<String, StaticResource>,
    prompts: BTreeMap<String, PromptTemplate>,
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("prompts", &self.prompts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its definition's name, replacing any previous
    /// tool of that name.
    pub fn register_tool(&mut self, tool: Arc<dyn ToolHandler>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    /// Register a resource under its URI.
    pub fn register_resource(&mut self, resource: StaticResource) {
        self.resources.insert(resource.resource.uri.clone(), resource);
    }

    /// Register a prompt under its name.
    pub fn register_prompt(&mut self, prompt: PromptTemplate) {
        self.prompts.insert(prompt.prompt.name.clone(), prompt);
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.tools.values().map(|t| t.definition()).collect(),
            next_cursor: None,
        }
    }

    fn list_resources(&self) -> ListResourcesResult {
        ListResourcesResult {
            resources: self.resources.values().map(|r| r.resource.clone()).collect(),
            next_cursor: None,
        }
    }

    fn list_prompts(&self) -> ListPromptsResult {
        ListPromptsResult {
            prompts: self.prompts.values().map(|p| p.prompt.clone()).collect(),
            next_cursor: None,
        }
    }
}

/// Static configuration of a server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Reported as `serverInfo`.
    pub info: Implementation,
    /// Declared capability set.
    pub capabilities: CapabilitySet,
    /// Returned with the handshake.
    pub instructions: Option<String>,
    /// Settings of the underlying session.
    pub session: SessionConfig,
}

impl ServerOptions {
    /// Options for `info` declaring `capabilities`.
    pub fn new(info: Implementation, capabilities: CapabilitySet) -> Self {
        Self {
            info,
            capabilities,
            instructions: None,
            session: SessionConfig::labelled("server"),
        }
    }
}

struct ServerState {
    options: ServerOptions,
    registry: ServerRegistry,
    negotiator: Negotiator,
}

impl ServerState {
    async fn handle(self: Arc<Self>, request: InboundRequest) -> Result<Value> {
        if request.method == METHOD_INITIALIZE {
            let params: InitializeParams = required_params(request.params)?;
            let result = self.negotiator.accept_initialize(
                params,
                &self.options.capabilities,
                &self.options.info,
                self.options.instructions.clone(),
            )?;
            return Ok(serde_json::to_value(result)?);
        }

        if let Some(capability) = Operation::capability_of(&request.method)? {
            self.negotiator.require(capability)?;
        }
        let operation = Operation::parse(&request.method, request.params)?;
        self.dispatch(operation, request.id).await
    }

    async fn dispatch(&self, operation: Operation, request_id: RequestId) -> Result<Value> {
        let registry = &self.registry;
        let value = match operation {
            Operation::Ping => json!({}),
            Operation::ListTools(_) => serde_json::to_value(registry.list_tools())?,
            Operation::CallTool(params) => {
                let tool = registry
                    .tools
                    .get(&params.name)
                    .cloned()
                    .ok_or_else(|| McpError::InvalidParams(format!("unknown tool: {}", params.name)))?;
                let context = ToolContext {
                    request_id,
                    sampler: SamplingRequester {
                        negotiator: self.negotiator.clone(),
                    },
                };
                let arguments = params.arguments.unwrap_or_else(|| json!({}));
                serde_json::to_value(tool.call(arguments, context).await?)?
            }
            Operation::ListResources(_) => serde_json::to_value(registry.list_resources())?,
            Operation::ReadResource(params) => {
                let resource = registry.resources.get(&params.uri).ok_or_else(|| {
                    McpError::InvalidParams(format!("unknown resource: {}", params.uri))
                })?;
                serde_json::to_value(ReadResourceResult {
                    contents: vec![resource.contents.clone()],
                })?
            }
            Operation::ListPrompts(_) => serde_json::to_value(registry.list_prompts())?,
            Operation::GetPrompt(params) => {
                let prompt = registry.prompts.get(&params.name).ok_or_else(|| {
                    McpError::InvalidParams(format!("unknown prompt: {}", params.name))
                })?;
                serde_json::to_value(prompt.render(&params.arguments)?)?
            }
        };
        Ok(value)
    }

    fn on_notification(&self, notification: &Notification) {
        if is_initialized_notification(&notification.method) {
            self.negotiator.mark_initialized();
        }
    }
}

/// Builds a [`ServerRole`].
#[derive(Debug)]
pub struct ServerBuilder {
    options: ServerOptions,
    registry: ServerRegistry,
}

impl ServerBuilder {
    /// Returned with the handshake.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.options.instructions = Some(instructions.into());
        self
    }

    /// Settings of the underlying session.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.options.session = config;
        self
    }

    /// Add a tool.
    pub fn tool<T: ToolHandler + 'static>(mut self, tool: T) -> Self {
        self.registry.register_tool(Arc::new(tool));
        self
    }

    /// Add a resource.
    pub fn resource(mut self, resource: StaticResource) -> Self {
        self.registry.register_resource(resource);
        self
    }

    /// Add a prompt.
    pub fn prompt(mut self, prompt: PromptTemplate) -> Self {
        self.registry.register_prompt(prompt);
        self
    }

    /// Start serving over `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn serve<T: Transport + 'static>(self, transport: T) -> ServerRole {
        let ServerBuilder { options, registry } = self;
        tracing::info!(
            server = %options.info.name,
            tools = registry.tool_count(),
            "starting MCP server"
        );
        let session_config = options.session.clone();
        let (_, state) = Session::builder(transport)
            .config(session_config)
            .start_with(move |session| {
                let state = Arc::new(ServerState {
                    options,
                    registry,
                    negotiator: Negotiator::new(session.clone()),
                });
                session.serve_requests({
                    let state = Arc::clone(&state);
                    move |request: InboundRequest| -> BoxFuture<'static, Result<Value>> {
                        Box::pin(Arc::clone(&state).handle(request))
                    }
                });
                session.on_notification({
                    let state = Arc::clone(&state);
                    move |notification: &Notification| state.on_notification(notification)
                });
                state
            });
        ServerRole { state }
    }
}

/// The server side of a session.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::server::{DelegatingTool, ServerRole};
/// use mcp_cli::mcp::transport::memory::MemoryTransport;
/// use mcp_cli::mcp::types::{CapabilitySet, Implementation};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let (_client_end, server_end) = MemoryTransport::pair();
/// let server = ServerRole::builder(
///     Implementation::new("demo-server", "0.1.0"),
///     CapabilitySet::new().with("tools", json!({})),
/// )
/// .tool(DelegatingTool::new("ask"))
/// .serve(server_end);
/// assert!(!server.session().is_closed());
/// # }
/// ```
#[derive(Clone)]
pub struct ServerRole {
    state: Arc<ServerState>,
}

impl std::fmt::Debug for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRole")
            .field("info", &self.state.options.info)
            .field("state", &self.state.negotiator.state())
            .finish_non_exhaustive()
    }
}

impl ServerRole {
    /// Begin configuring a server.
    pub fn builder(info: Implementation, capabilities: CapabilitySet) -> ServerBuilder {
        Self::with_options(ServerOptions::new(info, capabilities))
    }

    /// Begin configuring a server from complete options.
    pub fn with_options(options: ServerOptions) -> ServerBuilder {
        ServerBuilder {
            options,
            registry: ServerRegistry::new(),
        }
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        self.state.negotiator.session()
    }

    /// The negotiation state machine for this side.
    pub fn negotiator(&self) -> &Negotiator {
        &self.state.negotiator
    }

    /// Current negotiation state.
    pub fn state(&self) -> NegotiationState {
        self.state.negotiator.state()
    }

    /// Capabilities this server declared.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.state.options.capabilities
    }

    /// A handle for delegating sampling outside a tool call.
    pub fn sampler(&self) -> SamplingRequester {
        SamplingRequester {
            negotiator: self.state.negotiator.clone(),
        }
    }

    /// Ask the client for a completion. See [`SamplingRequester::create_message`].
    pub async fn request_sampling(&self, request: CreateMessageRequest) -> Result<SamplingResult> {
        self.sampler().create_message(request).await
    }

    /// Resolves once the client's `notifications/initialized` has been
    /// processed, or fails with [`McpError::SessionClosed`].
    pub async fn negotiated(&self) -> Result<()> {
        self.state.negotiator.wait_negotiated().await
    }

    /// Close the session.
    pub fn shutdown(&self) {
        self.session().shutdown();
    }

    /// Resolves when the session closes.
    pub async fn closed(&self) {
        self.session().closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::codec::{self, Message};
    use crate::mcp::transport::memory::MemoryTransport;
    use crate::mcp::types::{
        PromptArgument, TextResourceContents, CAPABILITY_NOT_GRANTED, INVALID_PARAMS,
        METHOD_INITIALIZED, METHOD_NOT_FOUND, NOT_NEGOTIATED,
    };
    use std::time::Duration;

    struct RawClient {
        peer: MemoryTransport,
        next_id: i64,
    }

    impl RawClient {
        async fn call(&mut self, method: &str, params: Option<Value>) -> Message {
            self.next_id += 1;
            self.peer
                .send(codec::encode(&Message::request(self.next_id.into(), method, params)))
                .await
                .unwrap();
            let frame = tokio::time::timeout(Duration::from_secs(2), self.peer.receive())
                .await
                .unwrap()
                .unwrap();
            codec::decode(&frame).unwrap()
        }

        async fn handshake(&mut self, caps: Value) {
            let reply = self
                .call(
                    METHOD_INITIALIZE,
                    Some(json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": caps,
                        "clientInfo": {"name": "raw", "version": "1"}
                    })),
                )
                .await;
            assert!(matches!(reply, Message::Response(_)), "{reply:?}");
            self.peer
                .send(codec::encode(&Message::notification(METHOD_INITIALIZED, None)))
                .await
                .unwrap();
        }
    }

    fn error_code(message: Message) -> i64 {
        match message {
            Message::Error(e) => e.error.code,
            other => panic!("expected error, got {other:?}"),
        }
    }

    fn result(message: Message) -> Value {
        match message {
            Message::Response(r) => r.result,
            other => panic!("expected response, got {other:?}"),
        }
    }

    fn server_with_registry() -> (ServerRole, RawClient) {
        let (client_end, server_end) = MemoryTransport::pair();
        let server = ServerRole::builder(
            Implementation::new("test-server", "1.0"),
            CapabilitySet::new()
                .with("tools", json!({"listChanged": true}))
                .with("resources", json!({}))
                .with("prompts", json!({})),
        )
        .instructions("hello")
        .tool(DelegatingTool::new("ask"))
        .resource(StaticResource {
            resource: Resource {
                uri: "memo://readme".into(),
                name: "readme".into(),
                description: None,
                mime_type: Some("text/plain".into()),
            },
            contents: ResourceContents::Text(TextResourceContents {
                uri: "memo://readme".into(),
                mime_type: Some("text/plain".into()),
                text: "read me".into(),
            }),
        })
        .prompt(PromptTemplate {
            prompt: Prompt {
                name: "greet".into(),
                description: Some("Greets someone".into()),
                arguments: vec![PromptArgument {
                    name: "who".into(),
                    description: None,
                    required: Some(true),
                }],
            },
            messages: vec![(Role::User, "Say hello to {{who}}".into())],
        })
        .serve(server_end);
        (
            server,
            RawClient {
                peer: client_end,
                next_id: 0,
            },
        )
    }

    #[tokio::test]
    async fn test_initialize_returns_declared_set_and_instructions() {
        let (server, mut client) = server_with_registry();
        let reply = result(
            client
                .call(
                    METHOD_INITIALIZE,
                    Some(json!({
                        "protocolVersion": "2025-03-26",
                        "capabilities": {"tools": {}},
                        "clientInfo": {"name": "raw", "version": "1"}
                    })),
                )
                .await,
        );
        assert_eq!(reply["protocolVersion"], "2025-03-26");
        assert_eq!(reply["serverInfo"]["name"], "test-server");
        assert_eq!(reply["instructions"], "hello");
        assert!(reply["capabilities"].get("prompts").is_some());
        assert_eq!(server.state(), NegotiationState::Initializing);
    }

    #[tokio::test]
    async fn test_operations_before_negotiation_are_rejected() {
        let (_server, mut client) = server_with_registry();
        let reply = client.call(METHOD_TOOLS_LIST, None).await;
        assert_eq!(error_code(reply), NOT_NEGOTIATED);
        // ping is ungated
        assert_eq!(result(client.call(METHOD_PING, None).await), json!({}));
    }

    #[tokio::test]
    async fn test_only_negotiated_capabilities_are_served() {
        let (server, mut client) = server_with_registry();
        client.handshake(json!({"tools": {}})).await;

        let tools = result(client.call(METHOD_TOOLS_LIST, None).await);
        assert_eq!(tools["tools"][0]["name"], "ask");
        assert_eq!(server.state(), NegotiationState::Negotiated);

        let reply = client.call(METHOD_RESOURCES_LIST, None).await;
        assert_eq!(error_code(reply), CAPABILITY_NOT_GRANTED);
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let (_server, mut client) = server_with_registry();
        client
            .handshake(json!({"tools": {}, "resources": {}, "prompts": {}}))
            .await;

        assert_eq!(error_code(client.call("foo/bar", None).await), METHOD_NOT_FOUND);
        assert_eq!(
            error_code(client.call(METHOD_TOOLS_CALL, Some(json!({"nope": 1}))).await),
            INVALID_PARAMS
        );
        assert_eq!(
            error_code(client.call(METHOD_TOOLS_CALL, Some(json!({"name": "missing"}))).await),
            INVALID_PARAMS
        );
        assert_eq!(
            error_code(client.call(METHOD_RESOURCES_READ, Some(json!({"uri": "memo://x"}))).await),
            INVALID_PARAMS
        );
        assert_eq!(
            error_code(client.call(METHOD_PROMPTS_GET, Some(json!({"name": "greet"}))).await),
            INVALID_PARAMS
        );
    }

    #[tokio::test]
    async fn test_resources_and_prompts() {
        let (_server, mut client) = server_with_registry();
        client
            .handshake(json!({"tools": {}, "resources": {}, "prompts": {}}))
            .await;

        let read = result(
            client
                .call(METHOD_RESOURCES_READ, Some(json!({"uri": "memo://readme"})))
                .await,
        );
        assert_eq!(read["contents"][0]["text"], "read me");

        let prompt = result(
            client
                .call(
                    METHOD_PROMPTS_GET,
                    Some(json!({"name": "greet", "arguments": {"who": "Ada"}})),
                )
                .await,
        );
        assert_eq!(prompt["messages"][0]["content"]["text"], "Say hello to Ada");

        let listed = result(client.call(METHOD_PROMPTS_LIST, None).await);
        assert_eq!(listed["prompts"][0]["name"], "greet");
    }

    #[tokio::test]
    async fn test_request_sampling_without_grant_fails_locally() {
        let (server, mut client) = server_with_registry();
        assert!(matches!(
            server.request_sampling(CreateMessageRequest::new("x", 5)).await,
            Err(McpError::NotNegotiated)
        ));

        client.handshake(json!({"tools": {}})).await;
        // The notification is processed before the next request is answered.
        let _ = client.call(METHOD_PING, None).await;
        assert!(matches!(
            server.request_sampling(CreateMessageRequest::new("x", 5)).await,
            Err(McpError::CapabilityNotGranted(c)) if c == "sampling"
        ));
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("ping", None).unwrap(), Operation::Ping);
        assert_eq!(
            Operation::parse("tools/list", Some(json!({"cursor": "c"}))).unwrap(),
            Operation::ListTools(PaginatedParams {
                cursor: Some("c".into())
            })
        );
        assert!(matches!(
            Operation::parse("tools/call", None),
            Err(McpError::InvalidParams(_))
        ));
        assert!(matches!(
            Operation::parse("nope", None),
            Err(McpError::MethodNotFound(_))
        ));
        assert_eq!(Operation::capability_of("prompts/get").unwrap(), Some("prompts"));
        assert_eq!(Operation::ListPrompts(PaginatedParams::default()).method(), "prompts/list");
    }
}
