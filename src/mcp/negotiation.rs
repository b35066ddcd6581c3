//! Capability negotiation state machine
//!
//! Each side of a session owns one [`Negotiator`]. The client drives the
//! handshake with [`Negotiator::initialize`]; the server answers it with
//! [`Negotiator::accept_initialize`] and completes it on
//! `notifications/initialized` with [`Negotiator::mark_initialized`].
//!
//! ```text
//! Unconnected --initialize--> Initializing --ok--> Negotiated
//!      ^                          |
//!      +---- non-fatal failure ---+--- version mismatch / close ---> Closed
//! ```
//!
//! After negotiation, [`Negotiator::require`] gates every capability-bound
//! operation on the negotiated set.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::{McpError, Result};
use crate::mcp::codec::RequestId;
use crate::mcp::session::Session;
use crate::mcp::telemetry::{Direction, EventKind};
use crate::mcp::types::{
    is_supported_version, CapabilitySet, Implementation, InitializeParams, InitializeResult,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Where a session side is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No handshake attempted, or the last attempt failed recoverably.
    Unconnected,
    /// `initialize` is in flight (client) or answered but not confirmed (server).
    Initializing,
    /// Capabilities agreed; gated operations may proceed.
    Negotiated,
    /// Terminal.
    Closed,
}

/// Everything learned from a completed client-side handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResult {
    /// Id of the `initialize` request.
    pub request_id: RequestId,
    /// Protocol revision in use.
    pub protocol_version: String,
    /// This side's identity.
    pub client_info: Implementation,
    /// The server's identity.
    pub server_info: Implementation,
    /// Capabilities this side declared.
    pub client_capabilities: CapabilitySet,
    /// Capabilities the server declared.
    pub server_capabilities: CapabilitySet,
    /// The negotiated intersection.
    pub negotiated: CapabilitySet,
    /// Instructions supplied by the server.
    pub instructions: Option<String>,
}

#[derive(Debug)]
struct Negotiation {
    state: NegotiationState,
    local: CapabilitySet,
    remote: CapabilitySet,
    negotiated: CapabilitySet,
    protocol_version: Option<String>,
    peer: Option<Implementation>,
}

impl Default for Negotiation {
    fn default() -> Self {
        Self {
            state: NegotiationState::Unconnected,
            local: CapabilitySet::new(),
            remote: CapabilitySet::new(),
            negotiated: CapabilitySet::new(),
            protocol_version: None,
            peer: None,
        }
    }
}

/// Drives and records capability negotiation for one session side.
#[derive(Debug, Clone)]
pub struct Negotiator {
    session: Session,
    data: Arc<Mutex<Negotiation>>,
    settled: Arc<Notify>,
}

impl Negotiator {
    /// A negotiator in the `Unconnected` state.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            data: Arc::new(Mutex::new(Negotiation::default())),
            settled: Arc::new(Notify::new()),
        }
    }

    /// The session this negotiator gates.
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn lock(&self) -> MutexGuard<'_, Negotiation> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if self.session.is_closed() {
            data.state = NegotiationState::Closed;
        }
        data
    }

    /// Current state. Reads as `Closed` once the session has closed.
    pub fn state(&self) -> NegotiationState {
        self.lock().state
    }

    /// The negotiated set (empty before negotiation).
    pub fn negotiated(&self) -> CapabilitySet {
        self.lock().negotiated.clone()
    }

    /// Capabilities this side declared.
    pub fn local_capabilities(&self) -> CapabilitySet {
        self.lock().local.clone()
    }

    /// Capabilities the peer declared.
    pub fn remote_capabilities(&self) -> CapabilitySet {
        self.lock().remote.clone()
    }

    /// Protocol revision agreed on, once known.
    pub fn protocol_version(&self) -> Option<String> {
        self.lock().protocol_version.clone()
    }

    /// The peer's identity, once known.
    pub fn peer_info(&self) -> Option<Implementation> {
        self.lock().peer.clone()
    }

    /// Resolves once the state is `Negotiated`.
    ///
    /// On the server side the state only advances when the client's
    /// `notifications/initialized` has been processed, which can trail the
    /// client's own view of the handshake.
    ///
    /// # Errors
    ///
    /// [`McpError::SessionClosed`] if the session closes first.
    pub async fn wait_negotiated(&self) -> Result<()> {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            match self.state() {
                NegotiationState::Negotiated => return Ok(()),
                NegotiationState::Closed => return Err(McpError::SessionClosed),
                NegotiationState::Unconnected | NegotiationState::Initializing => {}
            }
            tokio::select! {
                _ = &mut settled => {}
                _ = self.session.closed() => {}
            }
        }
    }

    /// Move `Unconnected -> Initializing`, or explain why not.
    fn begin(&self, local: &CapabilitySet) -> Result<()> {
        let mut data = self.lock();
        match data.state {
            NegotiationState::Unconnected => {
                data.state = NegotiationState::Initializing;
                data.local = local.clone();
                Ok(())
            }
            NegotiationState::Initializing => Err(McpError::AlreadyNegotiating),
            NegotiationState::Negotiated => Err(McpError::AlreadyNegotiated),
            NegotiationState::Closed => Err(McpError::SessionClosed),
        }
    }

    fn fail(&self, error: &McpError) {
        {
            let mut data = self.lock();
            if data.state == NegotiationState::Initializing {
                data.state = if error.is_fatal() {
                    NegotiationState::Closed
                } else {
                    NegotiationState::Unconnected
                };
            }
        }
        self.session.record(
            Direction::Local,
            EventKind::HandshakeFailed {
                error: error.to_string(),
            },
        );
    }

    /// Client side: run the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// - [`McpError::AlreadyNegotiating`] / [`McpError::AlreadyNegotiated`]
    ///   when called out of turn, [`McpError::SessionClosed`] once closed.
    /// - [`McpError::IncompatibleProtocolVersion`] when the server picks a
    ///   revision outside [`SUPPORTED_PROTOCOL_VERSIONS`]. The session is
    ///   shut down and the state becomes `Closed`.
    /// - Any request failure (timeout, remote error). Non-fatal failures
    ///   return the state to `Unconnected` so the caller may retry.
    pub async fn initialize(
        &self,
        client_info: Implementation,
        capabilities: CapabilitySet,
    ) -> Result<HandshakeResult> {
        self.begin(&capabilities)?;
        self.session.record(
            Direction::Outbound,
            EventKind::HandshakeStarted {
                protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            },
        );

        match self.exchange(&client_info, &capabilities).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.fail(&e);
                if matches!(e, McpError::IncompatibleProtocolVersion { .. }) {
                    self.session.shutdown();
                }
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        client_info: &Implementation,
        capabilities: &CapabilitySet,
    ) -> Result<HandshakeResult> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: capabilities.clone(),
            client_info: client_info.clone(),
        };
        let pending = self
            .session
            .send_request(METHOD_INITIALIZE, Some(serde_json::to_value(&params)?))?;
        let request_id = pending.id().clone();

        let reply = match self.session.default_timeout() {
            None => pending.response().await?,
            Some(deadline) => tokio::time::timeout(deadline, pending.response())
                .await
                .map_err(|_| McpError::Timeout {
                    method: METHOD_INITIALIZE.to_string(),
                    after_ms: deadline.as_millis() as u64,
                })??,
        };
        let response: InitializeResult = serde_json::from_value(reply)?;

        if !is_supported_version(&response.protocol_version) {
            return Err(McpError::IncompatibleProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            });
        }

        let negotiated = response.capabilities.intersect(capabilities);
        {
            let mut data = self.lock();
            if data.state != NegotiationState::Initializing {
                return Err(McpError::SessionClosed);
            }
            data.state = NegotiationState::Negotiated;
            data.remote = response.capabilities.clone();
            data.negotiated = negotiated.clone();
            data.protocol_version = Some(response.protocol_version.clone());
            data.peer = Some(response.server_info.clone());
        }

        self.settled.notify_waiters();
        self.session.notify(METHOD_INITIALIZED, None)?;
        self.completed(&response.protocol_version, &negotiated);

        Ok(HandshakeResult {
            request_id,
            protocol_version: response.protocol_version,
            client_info: client_info.clone(),
            server_info: response.server_info,
            client_capabilities: capabilities.clone(),
            server_capabilities: response.capabilities,
            negotiated,
            instructions: response.instructions,
        })
    }

    fn completed(&self, protocol_version: &str, negotiated: &CapabilitySet) {
        self.session.record(
            Direction::Local,
            EventKind::HandshakeCompleted {
                protocol_version: protocol_version.to_string(),
                negotiated: negotiated.names().map(str::to_string).collect(),
            },
        );
    }

    /// Server side: answer an `initialize` request.
    ///
    /// The client's revision is echoed when supported; otherwise the latest
    /// revision is offered and the client decides whether to continue.
    pub fn accept_initialize(
        &self,
        params: InitializeParams,
        local: &CapabilitySet,
        server_info: &Implementation,
        instructions: Option<String>,
    ) -> Result<InitializeResult> {
        self.begin(local)?;
        self.session.record(
            Direction::Inbound,
            EventKind::HandshakeStarted {
                protocol_version: params.protocol_version.clone(),
            },
        );

        let protocol_version = if is_supported_version(&params.protocol_version) {
            params.protocol_version
        } else {
            tracing::info!(
                requested = %params.protocol_version,
                offered = LATEST_PROTOCOL_VERSION,
                "client requested an unsupported protocol version"
            );
            LATEST_PROTOCOL_VERSION.to_string()
        };

        let mut data = self.lock();
        data.remote = params.capabilities.clone();
        data.negotiated = local.intersect(&params.capabilities);
        data.protocol_version = Some(protocol_version.clone());
        data.peer = Some(params.client_info);

        Ok(InitializeResult {
            protocol_version,
            capabilities: local.clone(),
            server_info: server_info.clone(),
            instructions,
        })
    }

    /// Server side: the client confirmed the handshake.
    ///
    /// Returns `false` (and changes nothing) unless the state was
    /// `Initializing`.
    pub fn mark_initialized(&self) -> bool {
        let (version, negotiated) = {
            let mut data = self.lock();
            if data.state != NegotiationState::Initializing {
                tracing::debug!(state = ?data.state, "ignoring unexpected initialized notification");
                return false;
            }
            data.state = NegotiationState::Negotiated;
            (
                data.protocol_version.clone().unwrap_or_default(),
                data.negotiated.clone(),
            )
        };
        self.settled.notify_waiters();
        self.completed(&version, &negotiated);
        true
    }

    /// Fail unless `capability` is in the negotiated set.
    ///
    /// # Errors
    ///
    /// [`McpError::NotNegotiated`] before negotiation completes,
    /// [`McpError::SessionClosed`] once closed, and
    /// [`McpError::CapabilityNotGranted`] when outside the set.
    pub fn require(&self, capability: &str) -> Result<()> {
        let data = self.lock();
        match data.state {
            NegotiationState::Negotiated => {
                if data.negotiated.contains(capability) {
                    Ok(())
                } else {
                    Err(McpError::CapabilityNotGranted(capability.to_string()))
                }
            }
            NegotiationState::Closed => Err(McpError::SessionClosed),
            _ => Err(McpError::NotNegotiated),
        }
    }

    /// Gate a method by the capability it belongs to. Ungated methods
    /// (`initialize`, `ping`) pass once negotiation has completed.
    pub fn require_method(&self, method: &str) -> Result<()> {
        match capability_for_method(method) {
            Some(capability) => self.require(capability),
            None => match self.state() {
                NegotiationState::Negotiated => Ok(()),
                NegotiationState::Closed => Err(McpError::SessionClosed),
                _ => Err(McpError::NotNegotiated),
            },
        }
    }
}

/// The capability a method belongs to, or `None` for lifecycle methods.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::negotiation::capability_for_method;
///
/// assert_eq!(capability_for_method("tools/call"), Some("tools"));
/// assert_eq!(capability_for_method("completion/complete"), Some("completions"));
/// assert_eq!(capability_for_method("ping"), None);
/// ```
pub fn capability_for_method(method: &str) -> Option<&'static str> {
    let (prefix, _) = method.split_once('/')?;
    match prefix {
        "tools" => Some("tools"),
        "resources" => Some("resources"),
        "prompts" => Some("prompts"),
        "sampling" => Some("sampling"),
        "completion" => Some("completions"),
        "logging" => Some("logging"),
        "roots" => Some("roots"),
        _ => None,
    }
}

/// Whether `method` is the client's handshake confirmation.
pub fn is_initialized_notification(method: &str) -> bool {
    method == METHOD_INITIALIZED || method == crate::mcp::types::METHOD_INITIALIZED_SHORT
}
