//! Correlated JSON-RPC session over a [`Transport`]
//!
//! A [`Session`] owns one transport and multiplexes everything that crosses
//! it: outbound requests waiting for their responses, inbound requests
//! answered by a registered [`RequestHandler`], and notifications in both
//! directions.
//!
//! # Design
//!
//! - A single read loop is the only caller of [`Transport::receive`]. It
//!   decodes each frame and classifies it as a response, a request or a
//!   notification.
//! - A single writer task is the only caller of [`Transport::send`]. Every
//!   outbound frame goes through an unbounded channel, so frames leave in
//!   the order they were produced.
//! - In-flight outbound requests are tracked in a `pending` map keyed by
//!   [`RequestId`]. Each entry holds a `oneshot::Sender` resolved exactly
//!   once: by the matching response, by [`Session::cancel`], or with
//!   [`McpError::SessionClosed`] when the read loop exits.
//! - Inbound requests run on spawned tasks so a handler can issue nested
//!   requests on the same session while the read loop keeps delivering
//!   their responses. Notifications are delivered inline, in arrival order.
//! - A [`CancellationToken`] stops both loops.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{McpError, Result};
use crate::mcp::codec::{self, ErrorResponse, Message, Notification, Request, RequestId, Response};
use crate::mcp::telemetry::{Direction, EventKind, EventSink, Outcome, ProtocolEvent, TracingSink};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CancelRequestParams, JsonRpcError, INTERNAL_ERROR, INVALID_REQUEST, METHOD_CANCEL_REQUEST,
};

/// Convenience alias for a boxed, `Send`-safe async future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    /// Correlation id chosen by the peer.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Raw parameters.
    pub params: Option<Value>,
}

/// Answers inbound requests.
///
/// `Ok(value)` becomes a response; `Err(error)` becomes an error response
/// carrying [`McpError::to_rpc_error`].
pub trait RequestHandler: Send + Sync {
    /// Handle one request.
    fn handle(&self, request: InboundRequest) -> BoxFuture<'static, Result<Value>>;
}

impl<F> RequestHandler for F
where
    F: Fn(InboundRequest) -> BoxFuture<'static, Result<Value>> + Send + Sync,
{
    fn handle(&self, request: InboundRequest) -> BoxFuture<'static, Result<Value>> {
        self(request)
    }
}

/// Called for each inbound notification, inline on the read loop.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync + 'static>;

/// Session-wide settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Short label used in logs and protocol events (e.g. `"client"`).
    pub label: String,
    /// Deadline applied by [`Session::request`]; `None` waits forever.
    pub default_timeout: Option<Duration>,
    /// Receives protocol events.
    pub events: Arc<dyn EventSink>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: "session".to_string(),
            default_timeout: None,
            events: Arc::new(TracingSink),
        }
    }
}

impl SessionConfig {
    /// Default settings under the given label.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
}

/// Per-call options for [`Session::request_with`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Deadline for this call; overrides the session default.
    pub timeout: Option<Duration>,
}

type Reply = Result<Value>;

struct PendingEntry {
    method: String,
    tx: oneshot::Sender<Reply>,
}

struct Inner {
    id: Uuid,
    config: SessionConfig,
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, PendingEntry>>,
    in_flight: Mutex<HashMap<RequestId, AbortHandle>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    request_handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    notification_handlers: RwLock<Vec<NotificationHandler>>,
    closed: CancellationToken,
}

/// A correlated JSON-RPC session. Cheap to clone; clones share state.
///
/// # Examples
///
/// ```
/// use mcp_cli::error::Result;
/// use mcp_cli::mcp::session::{BoxFuture, InboundRequest, Session, SessionConfig};
/// use mcp_cli::mcp::transport::memory::MemoryTransport;
/// use serde_json::{json, Value};
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let (a, b) = MemoryTransport::pair();
/// let client = Session::new(a, SessionConfig::labelled("client"));
/// let _server = Session::builder(b)
///     .request_handler(|req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
///         Box::pin(async move { Ok(json!({"echo": req.method})) })
///     })
///     .start();
///
/// let reply = client.request("hello", None).await?;
/// assert_eq!(reply, json!({"echo": "hello"}));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("label", &self.inner.config.label)
            .field("closed", &self.inner.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Configures handlers before the read loop starts, so no inbound frame can
/// arrive ahead of its handler.
pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    request_handler: Option<Arc<dyn RequestHandler>>,
    notification_handlers: Vec<NotificationHandler>,
}

impl SessionBuilder {
    /// Replace the session settings.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the inbound request handler.
    pub fn request_handler<H: RequestHandler + 'static>(mut self, handler: H) -> Self {
        self.request_handler = Some(Arc::new(handler));
        self
    }

    /// Add a notification handler.
    pub fn on_notification<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.notification_handlers.push(Arc::new(handler));
        self
    }

    /// Spawn the read and write loops and return the live session.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Session {
        self.start_with(|_| ()).0
    }

    /// Like [`SessionBuilder::start`], running `setup` on the new session
    /// before its loops are spawned.
    ///
    /// Handlers installed from `setup` (through [`Session::serve_requests`]
    /// or [`Session::on_notification`]) may capture the session itself and
    /// still see every inbound frame.
    pub fn start_with<R, F>(self, setup: F) -> (Session, R)
    where
        F: FnOnce(&Session) -> R,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let inner = Arc::new(Inner {
            id: Uuid::new_v4(),
            config: self.config,
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            outbound_tx,
            request_handler: RwLock::new(self.request_handler),
            notification_handlers: RwLock::new(self.notification_handlers),
            closed: CancellationToken::new(),
        });

        tracing::debug!(
            session = %inner.config.label,
            id = %inner.id,
            "starting MCP session"
        );

        let session = Session { inner };
        let output = setup(&session);

        tokio::spawn(write_loop(
            Arc::clone(&self.transport),
            outbound_rx,
            session.inner.closed.clone(),
        ));
        tokio::spawn(read_loop(self.transport, Arc::clone(&session.inner)));

        (session, output)
    }
}

impl Session {
    /// Start a session with no handlers registered.
    pub fn new<T: Transport + 'static>(transport: T, config: SessionConfig) -> Session {
        Session::builder(transport).config(config).start()
    }

    /// Begin configuring a session over `transport`.
    pub fn builder<T: Transport + 'static>(transport: T) -> SessionBuilder {
        Session::builder_shared(Arc::new(transport))
    }

    /// Like [`Session::builder`] for an already shared transport.
    pub fn builder_shared(transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder {
            transport,
            config: SessionConfig::default(),
            request_handler: None,
            notification_handlers: Vec::new(),
        }
    }

    /// Unique id of this session.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The label given in [`SessionConfig`].
    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    /// Deadline applied by [`Session::request`].
    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.config.default_timeout
    }

    /// The event sink shared by this session.
    pub fn events(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.inner.config.events)
    }

    /// Send a request and wait for its result, applying the session's
    /// default timeout.
    ///
    /// # Errors
    ///
    /// Returns the peer's error (typed when the code is recognized),
    /// [`McpError::Timeout`], [`McpError::Cancelled`], or
    /// [`McpError::SessionClosed`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with(method, params, RequestOptions::default())
            .await
    }

    /// Send a request with per-call options.
    pub async fn request_with(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let pending = self.send_request(method, params)?;
        let id = pending.id().clone();
        match options.timeout.or(self.inner.config.default_timeout) {
            None => pending.response().await,
            Some(deadline) => match tokio::time::timeout(deadline, pending.response()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // The pending entry was removed when the response future dropped.
                    self.inner.send_cancel_notice(&id);
                    tracing::debug!(
                        session = %self.inner.config.label,
                        id = %id,
                        method,
                        "request timed out"
                    );
                    Err(McpError::Timeout {
                        method: method.to_string(),
                        after_ms: deadline.as_millis() as u64,
                    })
                }
            },
        }
    }

    /// Send a request and return a handle to its eventual response.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::SessionClosed`] if the session is closed.
    pub fn send_request(&self, method: &str, params: Option<Value>) -> Result<PendingRequest> {
        if self.is_closed() {
            return Err(McpError::SessionClosed);
        }
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));

        // Register before sending so the response can never beat the entry.
        let (tx, rx) = oneshot::channel();
        self.inner.lock_pending().insert(
            id.clone(),
            PendingEntry {
                method: method.to_string(),
                tx,
            },
        );
        // A shutdown racing the insert may already have drained the table.
        if self.is_closed() {
            self.inner.lock_pending().remove(&id);
            return Err(McpError::SessionClosed);
        }

        let frame = codec::encode(&Message::request(id.clone(), method, params));
        if self.inner.outbound_tx.send(frame).is_err() {
            self.inner.lock_pending().remove(&id);
            return Err(McpError::SessionClosed);
        }
        self.inner.record(
            Direction::Outbound,
            EventKind::Request {
                id: id.clone(),
                method: method.to_string(),
            },
        );

        Ok(PendingRequest {
            id,
            rx: Some(rx),
            session: self.clone(),
        })
    }

    /// Send a notification. Nothing is ever returned for it.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::SessionClosed`] if the session is closed.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(McpError::SessionClosed);
        }
        let frame = codec::encode(&Message::notification(method, params));
        self.inner
            .outbound_tx
            .send(frame)
            .map_err(|_| McpError::SessionClosed)?;
        self.inner.record(
            Direction::Outbound,
            EventKind::Notification {
                method: method.to_string(),
            },
        );
        Ok(())
    }

    /// Cancel an outbound request.
    ///
    /// The waiting caller is resolved with [`McpError::Cancelled`]
    /// immediately and `$/cancelRequest` is sent to the peer. Returns
    /// `false` when `id` was not pending.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let entry = self.inner.lock_pending().remove(id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(Err(McpError::Cancelled));
                self.inner.send_cancel_notice(id);
                tracing::debug!(
                    session = %self.inner.config.label,
                    id = %id,
                    method = %entry.method,
                    "request cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Number of outbound requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Register an additional notification handler.
    pub fn on_notification<F>(&self, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.inner.notification_handlers.write() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Install or replace the inbound request handler.
    pub fn serve_requests<H: RequestHandler + 'static>(&self, handler: H) {
        if let Ok(mut slot) = self.inner.request_handler.write() {
            *slot = Some(Arc::new(handler));
        }
    }

    /// Close the session. Pending requests resolve with
    /// [`McpError::SessionClosed`]; frames already queued are flushed
    /// before the transport is closed. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.closed.is_cancelled() {
            tracing::debug!(session = %self.inner.config.label, "shutting down MCP session");
        }
        self.inner.closed.cancel();
        self.inner.fail_pending();
    }

    /// Returns `true` once the session has closed for any reason.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves when the session closes.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub(crate) fn record(&self, direction: Direction, kind: EventKind) {
        self.inner.record(direction, kind);
    }
}

/// A request that has been sent but not yet answered.
///
/// Dropping it before the response arrives removes the pending entry
/// without notifying the peer.
pub struct PendingRequest {
    id: RequestId,
    rx: Option<oneshot::Receiver<Reply>>,
    session: Session,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PendingRequest {
    /// The id assigned to this request.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// A handle that can cancel this request from elsewhere.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            id: self.id.clone(),
            session: self.session.clone(),
        }
    }

    /// Wait for the response.
    pub async fn response(mut self) -> Result<Value> {
        let Some(rx) = self.rx.take() else {
            return Err(McpError::SessionClosed);
        };
        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(McpError::SessionClosed),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.session.inner.lock_pending().remove(&self.id);
    }
}

/// Cancels one outbound request. See [`Session::cancel`].
#[derive(Debug, Clone)]
pub struct Canceller {
    id: RequestId,
    session: Session,
}

impl Canceller {
    /// Id of the request this handle cancels.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Cancel the request. Returns `false` if it already completed.
    pub fn cancel(&self) -> bool {
        self.session.cancel(&self.id)
    }
}

impl Inner {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, PendingEntry>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, AbortHandle>> {
        self.in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, direction: Direction, kind: EventKind) {
        self.config
            .events
            .record(ProtocolEvent::new(self.config.label.clone(), direction, kind));
    }

    fn write(&self, message: &Message) {
        let _ = self.outbound_tx.send(codec::encode(message));
    }

    fn send_cancel_notice(&self, id: &RequestId) {
        let params = serde_json::to_value(CancelRequestParams { id: id.clone() }).ok();
        self.write(&Message::notification(METHOD_CANCEL_REQUEST, params));
        self.record(
            Direction::Outbound,
            EventKind::Notification {
                method: METHOD_CANCEL_REQUEST.to_string(),
            },
        );
    }

    /// Resolve every pending request with `SessionClosed` and abort every
    /// inbound handler.
    fn fail_pending(&self) {
        let drained: Vec<(RequestId, PendingEntry)> = self.lock_pending().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(
                session = %self.config.label,
                count = drained.len(),
                "failing pending requests on close"
            );
        }
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(McpError::SessionClosed));
        }
        for (_, handle) in self.lock_in_flight().drain() {
            handle.abort();
        }
    }

    /// Handlers may hold clones of the session; dropping them breaks the
    /// reference cycle once the session is closed.
    fn release_handlers(&self) {
        if let Ok(mut slot) = self.request_handler.write() {
            slot.take();
        }
        if let Ok(mut handlers) = self.notification_handlers.write() {
            handlers.clear();
        }
    }

    fn dispatch(self: &Arc<Self>, frame: &str) {
        let message = match codec::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session = %self.config.label, "dropping undecodable frame: {e}");
                self.record(
                    Direction::Inbound,
                    EventKind::FrameDropped {
                        reason: e.to_string(),
                    },
                );
                if let Some(reply) = codec::error_reply_for(frame, &e) {
                    self.write(&reply);
                }
                return;
            }
        };

        match message {
            Message::Response(response) => self.handle_response(response),
            Message::Error(error) => self.handle_error_response(error),
            Message::Request(request) => self.handle_request(request),
            Message::Notification(notification) => self.handle_notification(notification),
        }
    }

    fn resolve(&self, id: &RequestId, reply: Reply) {
        let entry = self.lock_pending().remove(id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(reply);
            }
            None => {
                let err = McpError::UnexpectedResponse(id.clone());
                tracing::warn!(session = %self.config.label, "{err}; dropping");
                self.record(
                    Direction::Inbound,
                    EventKind::FrameDropped {
                        reason: err.to_string(),
                    },
                );
            }
        }
    }

    fn handle_response(&self, response: Response) {
        self.record(
            Direction::Inbound,
            EventKind::Response {
                id: Some(response.id.clone()),
                outcome: Outcome::Ok,
            },
        );
        self.resolve(&response.id, Ok(response.result));
    }

    fn handle_error_response(&self, response: ErrorResponse) {
        self.record(
            Direction::Inbound,
            EventKind::Response {
                id: response.id.clone(),
                outcome: Outcome::Error {
                    code: response.error.code,
                    message: response.error.message.clone(),
                },
            },
        );
        match response.id {
            Some(id) => self.resolve(&id, Err(McpError::from_rpc_error(response.error))),
            None => tracing::warn!(
                session = %self.config.label,
                "peer reported an unattributed error: {}",
                response.error
            ),
        }
    }

    fn handle_request(self: &Arc<Self>, request: Request) {
        self.record(
            Direction::Inbound,
            EventKind::Request {
                id: request.id.clone(),
                method: request.method.clone(),
            },
        );

        let handler = self
            .request_handler
            .read()
            .ok()
            .and_then(|slot| slot.clone());
        let Some(handler) = handler else {
            let error = McpError::MethodNotFound(request.method).to_rpc_error();
            self.reply(&request.id, Err(error));
            return;
        };

        let id = request.id.clone();
        let inbound = InboundRequest {
            id: request.id,
            method: request.method,
            params: request.params,
        };
        let inner = Arc::clone(self);

        // Hold the in-flight lock across spawn so the task cannot finish
        // before its abort handle is registered.
        let mut in_flight = self.lock_in_flight();
        if in_flight.contains_key(&id) {
            drop(in_flight);
            tracing::warn!(session = %self.config.label, id = %id, "duplicate inbound request id");
            let error = JsonRpcError::new(
                INVALID_REQUEST,
                format!("Invalid request: id {id} is already in flight"),
            );
            self.reply(&id, Err(error));
            return;
        }
        let task = tokio::spawn({
            let id = id.clone();
            async move {
                let outcome = AssertUnwindSafe(async move { handler.handle(inbound).await })
                    .catch_unwind()
                    .await;
                let reply = match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => {
                        tracing::debug!(session = %inner.config.label, id = %id, "request failed: {e}");
                        Err(e.to_rpc_error())
                    }
                    Err(_) => {
                        tracing::error!(session = %inner.config.label, id = %id, "request handler panicked");
                        Err(JsonRpcError::new(INTERNAL_ERROR, "Internal error: handler panicked"))
                    }
                };
                if inner.lock_in_flight().remove(&id).is_some() {
                    inner.reply(&id, reply);
                }
            }
        });
        in_flight.insert(id, task.abort_handle());
    }

    fn reply(&self, id: &RequestId, reply: std::result::Result<Value, JsonRpcError>) {
        let (message, outcome) = match reply {
            Ok(result) => (Message::response(id.clone(), result), Outcome::Ok),
            Err(error) => {
                let outcome = Outcome::Error {
                    code: error.code,
                    message: error.message.clone(),
                };
                (Message::error(Some(id.clone()), error), outcome)
            }
        };
        self.write(&message);
        self.record(
            Direction::Outbound,
            EventKind::Response {
                id: Some(id.clone()),
                outcome,
            },
        );
    }

    fn handle_notification(&self, notification: Notification) {
        self.record(
            Direction::Inbound,
            EventKind::Notification {
                method: notification.method.clone(),
            },
        );

        if notification.method == METHOD_CANCEL_REQUEST {
            self.handle_cancel_notice(&notification);
            return;
        }

        let handlers: Vec<NotificationHandler> = match self.notification_handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };
        if handlers.is_empty() {
            tracing::debug!(
                session = %self.config.label,
                method = %notification.method,
                "no handler for notification; ignoring"
            );
        }
        for handler in handlers {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&notification)));
            if outcome.is_err() {
                tracing::error!(
                    session = %self.config.label,
                    method = %notification.method,
                    "notification handler panicked"
                );
            }
        }
    }

    fn handle_cancel_notice(&self, notification: &Notification) {
        let params = notification
            .params
            .clone()
            .and_then(|p| serde_json::from_value::<CancelRequestParams>(p).ok());
        let Some(CancelRequestParams { id }) = params else {
            tracing::debug!(session = %self.config.label, "ignoring malformed $/cancelRequest");
            return;
        };
        let handle = self.lock_in_flight().remove(&id);
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!(session = %self.config.label, id = %id, "peer cancelled request");
            self.reply(&id, Err(McpError::Cancelled.to_rpc_error()));
        }
    }
}

async fn read_loop(transport: Arc<dyn Transport>, inner: Arc<Inner>) {
    loop {
        let frame = tokio::select! {
            biased;

            _ = inner.closed.cancelled() => break,

            frame = transport.receive() => frame,
        };
        match frame {
            Ok(frame) => inner.dispatch(&frame),
            Err(McpError::TransportClosed) => {
                tracing::debug!(session = %inner.config.label, "transport closed by peer");
                break;
            }
            Err(e) => {
                tracing::warn!(session = %inner.config.label, "transport receive failed: {e}");
                break;
            }
        }
    }
    inner.closed.cancel();
    inner.fail_pending();
    inner.release_handlers();
}

async fn write_loop(
    transport: Arc<dyn Transport>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;

            frame = outbound_rx.recv() => frame,

            _ = closed.cancelled() => None,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = transport.send(frame).await {
            tracing::warn!("transport send failed; closing session: {e}");
            closed.cancel();
            break;
        }
    }
    // Flush anything queued before the close was observed.
    while let Ok(frame) = outbound_rx.try_recv() {
        if transport.send(frame).await.is_err() {
            break;
        }
    }
    let _ = transport.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::telemetry::MemorySink;
    use crate::mcp::transport::memory::MemoryTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// A session plus the raw peer end of its transport.
    fn session_with_raw_peer() -> (Session, MemoryTransport) {
        let (ours, theirs) = MemoryTransport::pair();
        (Session::new(ours, SessionConfig::labelled("test")), theirs)
    }

    async fn next_message(peer: &MemoryTransport) -> Message {
        let frame = tokio::time::timeout(Duration::from_secs(2), peer.receive())
            .await
            .expect("timed out waiting for frame")
            .unwrap();
        codec::decode(&frame).unwrap()
    }

    fn echo_handler() -> impl RequestHandler {
        |req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
            Box::pin(async move { Ok(json!({"method": req.method, "params": req.params})) })
        }
    }

    #[tokio::test]
    async fn test_request_resolves_with_matching_response() {
        let (session, peer) = session_with_raw_peer();
        let call = tokio::spawn({
            let session = session.clone();
            async move { session.request("tools/list", Some(json!({}))).await }
        });

        let Message::Request(req) = next_message(&peer).await else {
            panic!("expected request");
        };
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.method, "tools/list");
        peer.send(codec::encode(&Message::response(req.id, json!({"tools": []}))))
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!({"tools": []}));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let (session, peer) = session_with_raw_peer();
        let a = session.send_request("a", None).unwrap();
        let b = session.send_request("b", None).unwrap();
        assert_eq!(a.id(), &RequestId::Number(1));
        assert_eq!(b.id(), &RequestId::Number(2));
        drop(peer);
    }

    #[tokio::test]
    async fn test_error_response_is_typed() {
        let (session, peer) = session_with_raw_peer();
        let pending = session.send_request("sampling/createMessage", None).unwrap();
        let id = pending.id().clone();
        let _ = next_message(&peer).await;
        peer.send(codec::encode(&Message::error(
            Some(id),
            McpError::CapabilityNotGranted("sampling".into()).to_rpc_error(),
        )))
        .await
        .unwrap();

        match pending.response().await {
            Err(McpError::CapabilityNotGranted(cap)) => assert_eq!(cap, "sampling"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_and_sends_cancel() {
        let (session, peer) = session_with_raw_peer();
        let outcome = session
            .request_with(
                "slow",
                None,
                RequestOptions {
                    timeout: Some(Duration::from_millis(30)),
                },
            )
            .await;
        assert!(matches!(outcome, Err(McpError::Timeout { ref method, .. }) if method == "slow"));
        assert_eq!(session.pending_count(), 0);

        let _request = next_message(&peer).await;
        match next_message(&peer).await {
            Message::Notification(n) => {
                assert_eq!(n.method, METHOD_CANCEL_REQUEST);
                assert_eq!(n.params, Some(json!({"id": 1})));
            }
            other => panic!("expected cancel notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_late_response_after_cancel_is_dropped() {
        let sink = Arc::new(MemorySink::new());
        let (ours, peer) = MemoryTransport::pair();
        let session = Session::new(
            ours,
            SessionConfig {
                label: "client".into(),
                default_timeout: None,
                events: sink.clone(),
            },
        );

        let pending = session.send_request("work", None).unwrap();
        let id = pending.id().clone();
        assert!(pending.canceller().cancel());
        assert!(matches!(pending.response().await, Err(McpError::Cancelled)));

        peer.send(codec::encode(&Message::response(id, json!("late"))))
            .await
            .unwrap();
        // A ping round trip proves the late frame has been processed.
        let ping = tokio::spawn({
            let session = session.clone();
            async move { session.request("ping", None).await }
        });
        loop {
            if let Message::Request(req) = next_message(&peer).await {
                if req.method != "ping" {
                    continue;
                }
                peer.send(codec::encode(&Message::response(req.id, json!({}))))
                    .await
                    .unwrap();
                break;
            }
        }
        ping.await.unwrap().unwrap();

        assert!(sink.events().iter().any(|e| matches!(
            &e.event.kind,
            EventKind::FrameDropped { reason } if reason.contains("unexpected response")
        )));
    }

    #[tokio::test]
    async fn test_no_handler_answers_method_not_found() {
        let (_session, peer) = session_with_raw_peer();
        peer.send(codec::encode(&Message::request(7.into(), "tools/list", None)))
            .await
            .unwrap();
        match next_message(&peer).await {
            Message::Error(e) => {
                assert_eq!(e.id, Some(RequestId::Number(7)));
                assert_eq!(e.error.code, crate::mcp::types::METHOD_NOT_FOUND);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_result_and_error_are_sent_back() {
        let (ours, peer) = MemoryTransport::pair();
        let _session = Session::builder(ours)
            .request_handler(|req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
                Box::pin(async move {
                    match req.method.as_str() {
                        "ok" => Ok(json!(1)),
                        "denied" => Err(McpError::CapabilityNotGranted("tools".into())),
                        _ => Err(McpError::Config("boom".into())),
                    }
                })
            })
            .start();

        for (id, method) in [(1, "ok"), (2, "denied"), (3, "other")] {
            peer.send(codec::encode(&Message::request(id.into(), method, None)))
                .await
                .unwrap();
            let reply = next_message(&peer).await;
            match (method, reply) {
                ("ok", Message::Response(r)) => assert_eq!(r.result, json!(1)),
                ("denied", Message::Error(e)) => {
                    assert_eq!(e.error.code, crate::mcp::types::CAPABILITY_NOT_GRANTED)
                }
                ("other", Message::Error(e)) => assert_eq!(e.error.code, INTERNAL_ERROR),
                (m, r) => panic!("unexpected reply to {m}: {r:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_yields_internal_error() {
        let (ours, peer) = MemoryTransport::pair();
        let session = Session::builder(ours)
            .request_handler(|_req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
                Box::pin(async move { panic!("handler bug") })
            })
            .start();

        peer.send(codec::encode(&Message::request(1.into(), "x", None)))
            .await
            .unwrap();
        match next_message(&peer).await {
            Message::Error(e) => assert_eq!(e.error.code, INTERNAL_ERROR),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_inbound_cancel_aborts_handler() {
        let started = Arc::new(tokio::sync::Notify::new());
        let (ours, peer) = MemoryTransport::pair();
        let _session = Session::builder(ours)
            .request_handler({
                let started = Arc::clone(&started);
                move |_req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
                    let started = Arc::clone(&started);
                    Box::pin(async move {
                        started.notify_one();
                        futures::future::pending::<()>().await;
                        Ok(Value::Null)
                    })
                }
            })
            .start();

        peer.send(codec::encode(&Message::request(4.into(), "slow", None)))
            .await
            .unwrap();
        started.notified().await;
        peer.send(codec::encode(&Message::notification(
            METHOD_CANCEL_REQUEST,
            Some(json!({"id": 4})),
        )))
        .await
        .unwrap();

        match next_message(&peer).await {
            Message::Error(e) => {
                assert_eq!(e.id, Some(RequestId::Number(4)));
                assert_eq!(e.error.code, crate::mcp::types::REQUEST_CANCELLED);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_inbound_id_is_rejected_and_original_kept() {
        let (ours, peer) = MemoryTransport::pair();
        let _session = Session::builder(ours)
            .request_handler(|_req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
                Box::pin(async move {
                    futures::future::pending::<()>().await;
                    Ok(Value::Null)
                })
            })
            .start();

        peer.send(codec::encode(&Message::request(7.into(), "slow", None)))
            .await
            .unwrap();
        peer.send(codec::encode(&Message::request(7.into(), "slow", None)))
            .await
            .unwrap();
        match next_message(&peer).await {
            Message::Error(e) => {
                assert_eq!(e.id, Some(RequestId::Number(7)));
                assert_eq!(e.error.code, INVALID_REQUEST);
            }
            other => panic!("unexpected {other:?}"),
        }

        // The first request is still tracked and can be cancelled.
        peer.send(codec::encode(&Message::notification(
            METHOD_CANCEL_REQUEST,
            Some(json!({"id": 7})),
        )))
        .await
        .unwrap();
        match next_message(&peer).await {
            Message::Error(e) => assert_eq!(e.error.code, crate::mcp::types::REQUEST_CANCELLED),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_notification_handler_keeps_session_running() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (ours, peer) = MemoryTransport::pair();
        let session = Session::builder(ours)
            .request_handler(echo_handler())
            .on_notification(|n: &Notification| {
                if n.method == "boom" {
                    panic!("notification handler bug");
                }
            })
            .on_notification({
                let seen = Arc::clone(&seen);
                move |_n: &Notification| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .start();

        peer.send(codec::encode(&Message::notification("boom", None)))
            .await
            .unwrap();
        peer.send(codec::encode(&Message::request(1.into(), "after", None)))
            .await
            .unwrap();

        match next_message(&peer).await {
            Message::Response(r) => assert_eq!(r.result["method"], "after"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_notifications_delivered_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (ours, peer) = MemoryTransport::pair();
        let session = Session::builder(ours)
            .on_notification({
                let seen = Arc::clone(&seen);
                move |n: &Notification| seen.lock().unwrap().push(n.method.clone())
            })
            .start();
        let count = Arc::new(AtomicUsize::new(0));
        session.on_notification({
            let count = Arc::clone(&count);
            move |_n: &Notification| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..10 {
            peer.send(codec::encode(&Message::notification(format!("n{i}"), None)))
                .await
                .unwrap();
        }
        for _ in 0..100 {
            if count.load(Ordering::SeqCst) == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let expected: Vec<String> = (0..10).map(|i| format!("n{i}")).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_undecodable_frame_answered_and_session_survives() {
        let (ours, peer) = MemoryTransport::pair();
        let _session = Session::builder(ours).request_handler(echo_handler()).start();

        peer.send("this is not json".into()).await.unwrap();
        match next_message(&peer).await {
            Message::Error(e) => {
                assert!(e.id.is_none());
                assert_eq!(e.error.code, crate::mcp::types::PARSE_ERROR);
            }
            other => panic!("unexpected {other:?}"),
        }

        peer.send(codec::encode(&Message::request(1.into(), "still-alive", None)))
            .await
            .unwrap();
        assert!(matches!(next_message(&peer).await, Message::Response(_)));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_and_rejects_new_requests() {
        let (session, _peer) = session_with_raw_peer();
        let pending = session.send_request("never", None).unwrap();
        session.shutdown();

        assert!(matches!(pending.response().await, Err(McpError::SessionClosed)));
        assert!(matches!(
            session.request("again", None).await,
            Err(McpError::SessionClosed)
        ));
        assert!(matches!(session.notify("n", None), Err(McpError::SessionClosed)));
        session.closed().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_requests_racing_shutdown_never_strand_an_entry() {
        for _ in 0..20 {
            let (session, _peer) = session_with_raw_peer();
            let senders: Vec<_> = (0..4)
                .map(|_| {
                    let session = session.clone();
                    tokio::spawn(async move {
                        let mut accepted = Vec::new();
                        for _ in 0..50 {
                            match session.send_request("race", None) {
                                Ok(pending) => accepted.push(pending),
                                Err(e) => {
                                    assert!(matches!(e, McpError::SessionClosed));
                                    break;
                                }
                            }
                        }
                        accepted
                    })
                })
                .collect();
            session.shutdown();

            for sender in senders {
                for pending in sender.await.unwrap() {
                    let outcome = tokio::time::timeout(Duration::from_secs(1), pending.response())
                        .await
                        .expect("request accepted around shutdown was never resolved");
                    assert!(matches!(outcome, Err(McpError::SessionClosed)));
                }
            }
            assert_eq!(session.pending_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_start_with_hands_session_to_setup() {
        let (ours, theirs) = MemoryTransport::pair();
        let (session, captured) = Session::builder(ours)
            .config(SessionConfig::labelled("setup"))
            .start_with(|session| {
                let handle = session.clone();
                session.serve_requests(
                    move |_req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
                        let handle = handle.clone();
                        Box::pin(async move { Ok(json!({"label": handle.label()})) })
                    },
                );
                session.id()
            });
        assert_eq!(captured, session.id());

        let peer = Session::new(theirs, SessionConfig::labelled("peer"));
        assert_eq!(
            peer.request("who", None).await.unwrap(),
            json!({"label": "setup"})
        );

        peer.shutdown();
        tokio::time::timeout(Duration::from_secs(1), session.closed())
            .await
            .expect("session should close when its peer does");
    }

    #[tokio::test]
    async fn test_peer_close_closes_session() {
        let (session, peer) = session_with_raw_peer();
        peer.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), session.closed())
            .await
            .expect("session should close with its transport");
        assert!(session.is_closed());
    }
}
