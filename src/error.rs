//! Error types for the MCP engine
//!
//! This module defines the error taxonomy shared by the transport, session,
//! negotiation, and role layers, using `thiserror` for ergonomic error
//! handling. Errors that can cross the wire (capability gating, sampling
//! backend failures, cancellation) map to and from JSON-RPC error codes so a
//! typed failure raised on one side arrives typed on the other.

use thiserror::Error;

use crate::mcp::codec::{DecodeError, RequestId};
use crate::mcp::types::{
    JsonRpcError, CAPABILITY_NOT_GRANTED, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, NOT_NEGOTIATED, REQUEST_CANCELLED, SAMPLING_BACKEND_ERROR,
};

/// Main error type for MCP engine operations
///
/// Transport-level variants are generally fatal to the owning session;
/// protocol-level variants are local to one request/response pair and
/// leave the session usable.
#[derive(Error, Debug)]
pub enum McpError {
    /// Channel-level failure (write error, peer disconnected mid-send)
    #[error("MCP transport error: {0}")]
    Transport(String),

    /// The transport was closed by either side
    #[error("MCP transport closed")]
    TransportClosed,

    /// A single inbound frame could not be decoded
    #[error("MCP decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The peer selected a protocol revision this side does not speak
    #[error("incompatible protocol version: expected one of {expected:?}, got {got}")]
    IncompatibleProtocolVersion {
        /// Versions this side accepts
        expected: Vec<String>,
        /// Version the peer selected
        got: String,
    },

    /// An `initialize` exchange is already in flight on this session
    #[error("capability negotiation already in progress")]
    AlreadyNegotiating,

    /// The session has already completed negotiation
    #[error("capability negotiation already completed")]
    AlreadyNegotiated,

    /// A capability-gated operation was used before negotiation completed
    #[error("session is not negotiated")]
    NotNegotiated,

    /// The capability is outside the negotiated set
    #[error("capability not granted: {0}")]
    CapabilityNotGranted(String),

    /// A response arrived for an id that is not pending
    #[error("unexpected response for id {0}")]
    UnexpectedResponse(RequestId),

    /// A response decoded but lacks a part the caller depends on
    #[error("malformed result: {0}")]
    MalformedResult(String),

    /// The request was cancelled before a response arrived
    #[error("request cancelled")]
    Cancelled,

    /// The session closed before a response arrived
    #[error("session closed")]
    SessionClosed,

    /// The per-call deadline elapsed
    #[error("MCP timeout: method={method}, after {after_ms}ms")]
    Timeout {
        /// Method of the timed-out request
        method: String,
        /// Deadline in milliseconds
        after_ms: u64,
    },

    /// The inference backend failed while answering a sampling request
    #[error("sampling backend error: {0}")]
    SamplingBackend(String),

    /// No handler exists for the requested method
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Request parameters did not match the method's schema
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The peer answered with an error this side has no typed mapping for
    #[error("{0}")]
    Rpc(JsonRpcError),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Stable, machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            McpError::Transport(_) => "TransportError",
            McpError::TransportClosed => "TransportClosed",
            McpError::Decode(_) => "DecodeError",
            McpError::IncompatibleProtocolVersion { .. } => "IncompatibleProtocolVersion",
            McpError::AlreadyNegotiating => "AlreadyNegotiating",
            McpError::AlreadyNegotiated => "AlreadyNegotiated",
            McpError::NotNegotiated => "NotNegotiated",
            McpError::CapabilityNotGranted(_) => "CapabilityNotGranted",
            McpError::UnexpectedResponse(_) => "UnexpectedResponse",
            McpError::MalformedResult(_) => "MalformedResult",
            McpError::Cancelled => "Cancelled",
            McpError::SessionClosed => "SessionClosed",
            McpError::Timeout { .. } => "Timeout",
            McpError::SamplingBackend(_) => "SamplingBackendError",
            McpError::MethodNotFound(_) => "MethodNotFound",
            McpError::InvalidParams(_) => "InvalidParams",
            McpError::Rpc(_) => "RemoteError",
            McpError::Serialization(_) => "SerializationError",
            McpError::Config(_) => "ConfigError",
            McpError::Yaml(_) => "ConfigError",
            McpError::Io(_) => "IoError",
        }
    }

    /// Whether this error terminates the session that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::Transport(_)
                | McpError::TransportClosed
                | McpError::SessionClosed
                | McpError::IncompatibleProtocolVersion { .. }
        )
    }

    /// Convert this error into the JSON-RPC error object sent to the peer.
    ///
    /// Recognized protocol kinds keep their dedicated code; everything else
    /// is reported as a generic `-32603 Internal error` so local details do
    /// not leak their structure onto the wire.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let (code, message) = match self {
            McpError::CapabilityNotGranted(cap) => {
                (CAPABILITY_NOT_GRANTED, format!("Capability not granted: {cap}"))
            }
            McpError::NotNegotiated => (NOT_NEGOTIATED, "Session not negotiated".to_string()),
            McpError::AlreadyNegotiating | McpError::AlreadyNegotiated => {
                (INVALID_REQUEST, self.to_string())
            }
            McpError::SamplingBackend(msg) => {
                (SAMPLING_BACKEND_ERROR, format!("Sampling backend error: {msg}"))
            }
            McpError::MethodNotFound(method) => {
                (METHOD_NOT_FOUND, format!("Method not found: {method}"))
            }
            McpError::InvalidParams(msg) => (INVALID_PARAMS, format!("Invalid params: {msg}")),
            McpError::Cancelled => (REQUEST_CANCELLED, "Request cancelled".to_string()),
            McpError::Rpc(err) => return err.clone(),
            other => (INTERNAL_ERROR, format!("Internal error: {other}")),
        };
        JsonRpcError {
            code,
            message,
            data: None,
        }
    }

    /// Rebuild a typed error from a JSON-RPC error object sent by the peer.
    pub fn from_rpc_error(error: JsonRpcError) -> Self {
        match error.code {
            CAPABILITY_NOT_GRANTED => McpError::CapabilityNotGranted(
                error
                    .message
                    .strip_prefix("Capability not granted: ")
                    .unwrap_or(&error.message)
                    .to_string(),
            ),
            NOT_NEGOTIATED => McpError::NotNegotiated,
            SAMPLING_BACKEND_ERROR => McpError::SamplingBackend(
                error
                    .message
                    .strip_prefix("Sampling backend error: ")
                    .unwrap_or(&error.message)
                    .to_string(),
            ),
            REQUEST_CANCELLED => McpError::Cancelled,
            _ => McpError::Rpc(error),
        }
    }
}

/// Result type alias for MCP engine operations
pub type Result<T> = std::result::Result<T, McpError>;
