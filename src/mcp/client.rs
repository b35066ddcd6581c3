//! Client role
//!
//! A [`ClientRole`] drives the handshake, calls the server's tools,
//! resources and prompts, and answers the server's
//! `sampling/createMessage` requests:
//!
//! 1. sampling must be in the negotiated set, otherwise the request fails
//!    with `CapabilityNotGranted`;
//! 2. the [`ConsentPolicy`] rules on the request, given the requesting
//!    server's identity;
//! 3. a denial is answered with a refusal result and the backend is never
//!    invoked;
//! 4. otherwise the rendered prompt goes to the [`InferenceBackend`]. A
//!    backend failure is answered with `-32012 Sampling backend error`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{McpError, Result};
use crate::mcp::backend::{
    GenerationConstraints, InferenceBackend, SamplingPrompt, StaticBackend,
};
use crate::mcp::consent::{AllowAll, ConsentDecision, ConsentPolicy, RequesterIdentity};
use crate::mcp::negotiation::{HandshakeResult, NegotiationState, Negotiator};
use crate::mcp::session::{BoxFuture, InboundRequest, Session, SessionConfig};
use crate::mcp::telemetry::{Direction, EventKind};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, CallToolResult, CapabilitySet, Content, CreateMessageRequest,
    CreateMessageResult, GetPromptParams, GetPromptResult, Implementation, ListPromptsResult,
    ListResourcesResult, ListToolsResult, PaginatedParams, Prompt, ReadResourceParams,
    ReadResourceResult, Resource, ResourceContents, Role, SamplingResult, ToolDefinition,
    METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST,
    METHOD_RESOURCES_READ, METHOD_SAMPLING_CREATE_MESSAGE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

/// Configuration of a [`ClientRole`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Reported as `clientInfo`.
    pub info: Implementation,
    /// Declared capability set.
    pub capabilities: CapabilitySet,
    /// Settings of the underlying session.
    pub session: SessionConfig,
    /// Rules on inbound sampling requests.
    pub consent: Arc<dyn ConsentPolicy>,
    /// Answers allowed sampling requests.
    pub backend: Arc<dyn InferenceBackend>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .field("session", &self.session)
            .field("consent", &self.consent)
            .field("backend", &self.backend.model_name())
            .finish()
    }
}

impl ClientOptions {
    /// Options that allow every sampling request and answer it with an
    /// empty static reply. Replace `consent` and `backend` for real use.
    pub fn new(info: Implementation, capabilities: CapabilitySet) -> Self {
        Self {
            info,
            capabilities,
            session: SessionConfig::labelled("client"),
            consent: Arc::new(AllowAll),
            backend: Arc::new(StaticBackend::new("")),
        }
    }

    /// Use `consent` for inbound sampling requests.
    pub fn consent(mut self, consent: Arc<dyn ConsentPolicy>) -> Self {
        self.consent = consent;
        self
    }

    /// Use `backend` for allowed sampling requests.
    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Settings of the underlying session.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }
}

struct ClientState {
    options: ClientOptions,
    negotiator: Negotiator,
}

impl ClientState {
    async fn handle(self: Arc<Self>, request: InboundRequest) -> Result<Value> {
        match request.method.as_str() {
            METHOD_SAMPLING_CREATE_MESSAGE => {
                let result = self.create_message(request.params).await?;
                Ok(serde_json::to_value(result)?)
            }
            METHOD_PING => Ok(json!({})),
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    async fn create_message(&self, params: Option<Value>) -> Result<SamplingResult> {
        self.negotiator.require("sampling")?;
        let request: CreateMessageRequest = params
            .ok_or_else(|| McpError::InvalidParams("missing params".into()))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| McpError::InvalidParams(e.to_string()))
            })?;

        let session = self.negotiator.session();
        let requester =
            RequesterIdentity::from_peer(self.negotiator.peer_info().as_ref(), session.label());
        let decision = self.options.consent.decide(&requester, &request);
        session.record(
            Direction::Local,
            EventKind::Consent {
                requester: requester.server_name.clone(),
                allowed: decision.is_allowed(),
                reason: match &decision {
                    ConsentDecision::Deny { reason } => Some(reason.clone()),
                    ConsentDecision::Allow => None,
                },
            },
        );

        if let ConsentDecision::Deny { reason } = decision {
            tracing::info!(requester = %requester.server_name, "sampling refused: {reason}");
            return Ok(SamplingResult::refused(reason));
        }

        let prompt = SamplingPrompt::from_request(&request);
        let constraints = GenerationConstraints::from_request(&request);
        let backend = &self.options.backend;
        let text = backend.generate(&prompt, &constraints).await.map_err(|e| {
            tracing::warn!("sampling backend failed: {e}");
            McpError::from(e)
        })?;

        Ok(SamplingResult::Completed(CreateMessageResult {
            role: Role::Assistant,
            content: Content::text(text),
            model: backend.model_name(),
            stop_reason: Some("endTurn".to_string()),
        }))
    }
}

/// The client side of a session.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::client::{ClientOptions, ClientRole};
/// use mcp_cli::mcp::server::ServerRole;
/// use mcp_cli::mcp::transport::memory::MemoryTransport;
/// use mcp_cli::mcp::types::{CapabilitySet, Implementation};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> mcp_cli::error::Result<()> {
/// let (client_end, server_end) = MemoryTransport::pair();
/// let _server = ServerRole::builder(
///     Implementation::new("server", "1.0"),
///     CapabilitySet::new().with("tools", json!({})),
/// )
/// .serve(server_end);
/// let client = ClientRole::connect(
///     client_end,
///     ClientOptions::new(
///         Implementation::new("client", "1.0"),
///         CapabilitySet::new().with("tools", json!({})).with("sampling", json!({})),
///     ),
/// );
///
/// let handshake = client.initialize().await?;
/// assert!(handshake.negotiated.contains("tools"));
/// assert!(!handshake.negotiated.contains("sampling"));
/// assert!(client.list_tools().await?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientRole {
    state: Arc<ClientState>,
}

impl std::fmt::Debug for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRole")
            .field("info", &self.state.options.info)
            .field("state", &self.state.negotiator.state())
            .finish_non_exhaustive()
    }
}

impl ClientRole {
    /// Start a client session over `transport`. No frame is sent until
    /// [`ClientRole::initialize`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect<T: Transport + 'static>(transport: T, options: ClientOptions) -> ClientRole {
        tracing::debug!(client = %options.info.name, "connecting MCP client");
        let (_, state) = Session::builder(transport)
            .config(options.session.clone())
            .start_with(move |session| {
                let state = Arc::new(ClientState {
                    options,
                    negotiator: Negotiator::new(session.clone()),
                });
                session.serve_requests({
                    let state = Arc::clone(&state);
                    move |request: InboundRequest| -> BoxFuture<'static, Result<Value>> {
                        Box::pin(Arc::clone(&state).handle(request))
                    }
                });
                state
            });
        ClientRole { state }
    }

    /// Run the capability handshake.
    ///
    /// # Errors
    ///
    /// See [`Negotiator::initialize`].
    pub async fn initialize(&self) -> Result<HandshakeResult> {
        let options = &self.state.options;
        self.state
            .negotiator
            .initialize(options.info.clone(), options.capabilities.clone())
            .await
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

    /// The negotiated capability set.
    pub fn negotiated(&self) -> CapabilitySet {
        self.state.negotiator.negotiated()
    }

    /// Send any request, gated by the capability its method belongs to.
    ///
    /// # Errors
    ///
    /// [`McpError::NotNegotiated`] or [`McpError::CapabilityNotGranted`]
    /// without sending anything, otherwise whatever the request returns.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.state.negotiator.require_method(method)?;
        self.session().request(method, params).await
    }

    async fn call_typed<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        let reply = self
            .call(method, Some(serde_json::to_value(params)?))
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Check the server is alive. Allowed in any state but `Closed`.
    pub async fn ping(&self) -> Result<()> {
        self.session().request(METHOD_PING, None).await?;
        Ok(())
    }

    /// List every tool, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ListToolsResult = self
                .call_typed(METHOD_TOOLS_LIST, PaginatedParams { cursor })
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Invoke a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.call_typed(
            METHOD_TOOLS_CALL,
            CallToolParams {
                name: name.to_string(),
                arguments,
            },
        )
        .await
    }

    /// List every resource, following pagination.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ListResourcesResult = self
                .call_typed(METHOD_RESOURCES_LIST, PaginatedParams { cursor })
                .await?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(resources)
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let result: ReadResourceResult = self
            .call_typed(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
            )
            .await?;
        Ok(result.contents)
    }

    /// List every prompt, following pagination.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ListPromptsResult = self
                .call_typed(METHOD_PROMPTS_LIST, PaginatedParams { cursor })
                .await?;
            prompts.extend(page.prompts);
            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(prompts)
    }

    /// Render a prompt with the given arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        self.call_typed(
            METHOD_PROMPTS_GET,
            GetPromptParams {
                name: name.to_string(),
                arguments,
            },
        )
        .await
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
    use crate::mcp::backend::{BackendError, MockInferenceBackend};
    use crate::mcp::consent::DenyAll;
    use crate::mcp::server::{DelegatingTool, ServerRole};
    use crate::mcp::telemetry::MemorySink;
    use crate::mcp::transport::memory::MemoryTransport;

    fn caps(names: &[&str]) -> CapabilitySet {
        names.iter().map(|n| (*n, json!({}))).collect()
    }

    fn pair(
        client_caps: &[&str],
        server_caps: &[&str],
        options: impl FnOnce(ClientOptions) -> ClientOptions,
    ) -> (ClientRole, ServerRole) {
        let (client_end, server_end) = MemoryTransport::pair();
        let server = ServerRole::builder(Implementation::new("demo-server", "1.0"), caps(server_caps))
            .tool(DelegatingTool::new("ask"))
            .serve(server_end);
        let client = ClientRole::connect(
            client_end,
            options(ClientOptions::new(
                Implementation::new("demo-client", "1.0"),
                caps(client_caps),
            )),
        );
        (client, server)
    }

    #[tokio::test]
    async fn test_delegated_sampling_reaches_backend() {
        let mut backend = MockInferenceBackend::new();
        backend
            .expect_generate()
            .withf(|prompt, constraints| {
                prompt.to_string() == "user: hello" && constraints.max_tokens == 256
            })
            .times(1)
            .returning(|_, _| Ok("hi there".to_string()));
        backend.expect_model_name().return_const("mock-model".to_string());

        let (client, _server) = pair(&["tools", "sampling"], &["tools", "sampling"], |o| {
            o.backend(Arc::new(backend))
        });
        client.initialize().await.unwrap();

        let result = client
            .call_tool("ask", Some(json!({"prompt": "hello"})))
            .await
            .unwrap();
        assert_eq!(result.joined_text(), "hi there");
        assert_eq!(result.structured_content.unwrap()["model"], "mock-model");
    }

    #[tokio::test]
    async fn test_denied_sampling_is_refusal_and_backend_untouched() {
        let mut backend = MockInferenceBackend::new();
        backend.expect_generate().times(0);
        backend.expect_model_name().return_const("mock".to_string());
        let sink = Arc::new(MemorySink::new());

        let (client, server) = pair(&["sampling"], &["sampling"], |o| {
            o.backend(Arc::new(backend))
                .consent(Arc::new(DenyAll::new("not today")))
                .session_config(SessionConfig {
                    label: "client".into(),
                    default_timeout: None,
                    events: sink.clone(),
                })
        });
        client.initialize().await.unwrap();
        server.negotiated().await.unwrap();

        let outcome = server
            .request_sampling(CreateMessageRequest::new("hello", 10))
            .await
            .unwrap();
        match outcome {
            SamplingResult::Refused(refusal) => {
                assert!(refusal.refused);
                assert_eq!(refusal.reason, "not today");
            }
            other => panic!("expected refusal, got {other:?}"),
        }
        assert!(sink.events().iter().any(|e| matches!(
            &e.event.kind,
            EventKind::Consent { allowed: false, requester, .. } if requester == "demo-server"
        )));
    }

    #[tokio::test]
    async fn test_backend_failure_is_typed_error() {
        let mut backend = MockInferenceBackend::new();
        backend
            .expect_generate()
            .returning(|_, _| Err(BackendError::Unavailable("model not loaded".into())));
        backend.expect_model_name().return_const("mock".to_string());

        let (client, server) = pair(&["sampling"], &["sampling"], |o| o.backend(Arc::new(backend)));
        client.initialize().await.unwrap();
        server.negotiated().await.unwrap();

        match server.request_sampling(CreateMessageRequest::new("x", 10)).await {
            Err(McpError::SamplingBackend(message)) => assert!(message.contains("model not loaded")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gated_client_operations() {
        let (client, _server) = pair(&["tools"], &["tools", "resources"], |o| o);
        assert!(matches!(client.list_tools().await, Err(McpError::NotNegotiated)));

        let handshake = client.initialize().await.unwrap();
        assert_eq!(handshake.negotiated, caps(&["tools"]));
        assert_eq!(handshake.server_capabilities, caps(&["tools", "resources"]));
        assert_eq!(handshake.server_info.name, "demo-server");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert!(matches!(
            client.list_resources().await,
            Err(McpError::CapabilityNotGranted(c)) if c == "resources"
        ));
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_unnegotiated_sampling_rejected_by_server_side_gate() {
        // The client declares sampling, the server does not: the server
        // never sends, so drive the client handler directly.
        let (client, _server) = pair(&["tools", "sampling"], &["tools"], |o| o);
        client.initialize().await.unwrap();
        let outcome = client
            .state
            .create_message(Some(json!({"messages": [], "maxTokens": 5})))
            .await;
        assert!(matches!(outcome, Err(McpError::CapabilityNotGranted(c)) if c == "sampling"));
    }
}
