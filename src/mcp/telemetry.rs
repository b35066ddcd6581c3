//! Protocol event recording
//!
//! Sessions and roles report what crosses the wire (and the consent
//! decisions taken along the way) to an injected [`EventSink`]. The default
//! [`TracingSink`] turns each event into a structured `tracing` event;
//! [`MemorySink`] keeps an ordered in-memory log that tests and embedding
//! hosts can inspect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mcp::codec::RequestId;

/// Which way a frame travelled, from the recording side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the peer.
    Inbound,
    /// Sent to the peer.
    Outbound,
    /// A local decision with no frame attached.
    Local,
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    /// A result was returned.
    Ok,
    /// An error object was returned.
    Error {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// `initialize` is about to be sent or was received.
    HandshakeStarted {
        /// Version offered by the client.
        protocol_version: String,
    },
    /// Negotiation completed.
    HandshakeCompleted {
        /// Version in use.
        protocol_version: String,
        /// Names in the negotiated capability set.
        negotiated: Vec<String>,
    },
    /// Negotiation failed.
    HandshakeFailed {
        /// Error description.
        error: String,
    },
    /// A request frame.
    Request {
        /// Correlation id.
        id: RequestId,
        /// Method name.
        method: String,
    },
    /// A response or error response frame.
    Response {
        /// Correlation id, absent for unattributable errors.
        id: Option<RequestId>,
        /// Result or error.
        outcome: Outcome,
    },
    /// A notification frame.
    Notification {
        /// Method name.
        method: String,
    },
    /// A consent policy ruled on a sampling request.
    Consent {
        /// Name of the requesting server.
        requester: String,
        /// Whether the request may proceed.
        allowed: bool,
        /// Reason given for a denial.
        reason: Option<String>,
    },
    /// An inbound frame was discarded.
    FrameDropped {
        /// Why it was discarded.
        reason: String,
    },
}

/// A single protocol event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolEvent {
    /// Label of the recording session (e.g. `"client"`, `"server"`).
    pub session: String,
    /// Direction of travel.
    pub direction: Direction,
    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ProtocolEvent {
    /// Convenience constructor.
    pub fn new(session: impl Into<String>, direction: Direction, kind: EventKind) -> Self {
        Self {
            session: session.into(),
            direction,
            kind,
        }
    }
}

/// Receives protocol events. Implementations must not block.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Record one event.
    fn record(&self, event: ProtocolEvent);
}

/// Emits every event as a `tracing` debug event with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: ProtocolEvent) {
        let session = event.session.as_str();
        let direction = match event.direction {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
            Direction::Local => "local",
        };
        match &event.kind {
            EventKind::HandshakeStarted { protocol_version } => {
                tracing::debug!(session, direction, protocol_version = %protocol_version, "handshake started")
            }
            EventKind::HandshakeCompleted {
                protocol_version,
                negotiated,
            } => tracing::info!(
                session,
                protocol_version = %protocol_version,
                negotiated = ?negotiated,
                "handshake completed"
            ),
            EventKind::HandshakeFailed { error } => {
                tracing::warn!(session, error = %error, "handshake failed")
            }
            EventKind::Request { id, method } => {
                tracing::debug!(session, direction, id = %id, method = %method, "request")
            }
            EventKind::Response { id, outcome } => match outcome {
                Outcome::Ok => tracing::debug!(session, direction, id = ?id, "response"),
                Outcome::Error { code, message } => tracing::debug!(
                    session,
                    direction,
                    id = ?id,
                    code,
                    error_message = %message,
                    "error response"
                ),
            },
            EventKind::Notification { method } => {
                tracing::debug!(session, direction, method = %method, "notification")
            }
            EventKind::Consent {
                requester,
                allowed,
                reason,
            } => tracing::info!(
                session,
                requester = %requester,
                allowed,
                reason = reason.as_deref().unwrap_or(""),
                "sampling consent decision"
            ),
            EventKind::FrameDropped { reason } => {
                tracing::warn!(session, reason = %reason, "dropped inbound frame")
            }
        }
    }
}

/// An event as stored by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    /// Sequential id, starting at 1.
    pub id: u64,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub event: ProtocolEvent,
}

/// Keeps every event in memory, in recording order.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::telemetry::{Direction, EventKind, EventSink, MemorySink, ProtocolEvent};
///
/// let sink = MemorySink::new();
/// sink.record(ProtocolEvent::new(
///     "client",
///     Direction::Outbound,
///     EventKind::Notification { method: "notifications/initialized".into() },
/// ));
/// assert_eq!(sink.events().len(), 1);
/// assert!(sink.events_since(1).is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RecordedEvent>>,
    last_id: AtomicU64,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events_since(0)
    }

    /// Events whose id is greater than `after`.
    pub fn events_since(&self, after: u64) -> Vec<RecordedEvent> {
        match self.events.lock() {
            Ok(events) => events.iter().filter(|e| e.id > after).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Drops every recorded event. Ids keep increasing.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: ProtocolEvent) {
        if let Ok(mut events) = self.events.lock() {
            let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
            events.push(RecordedEvent {
                id,
                timestamp: Utc::now(),
                event,
            });
        }
    }
}
