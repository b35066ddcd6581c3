//! JSON-RPC 2.0 message codec
//!
//! Converts between wire frames (one JSON object per line, no trailing
//! newline) and the typed [`Message`] enum. Classification follows the
//! JSON-RPC 2.0 envelope rules: a `method` with an `id` is a request, a
//! `method` without an `id` is a notification, an `id` with `result` is a
//! response and anything carrying `error` is an error response.
//!
//! Decoding is done by hand rather than through `#[derive(Deserialize)]` so
//! that an explicit `"params": null` survives a round trip distinct from an
//! absent `params`, and so every failure maps to one of the three
//! [`DecodeError`] kinds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::mcp::types::{JsonRpcError, INVALID_REQUEST, PARSE_ERROR};

/// JSON-RPC protocol marker carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request identifier: an integer or a string.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::codec::RequestId;
///
/// assert_eq!(RequestId::from(7).to_string(), "7");
/// assert_eq!(RequestId::from("abc").to_string(), "\"abc\"");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id; the session's own generator only produces these.
    Number(i64),
    /// String id, accepted from peers.
    String(String),
}

impl RequestId {
    /// The id as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => Value::from(*n),
            RequestId::String(s) => Value::from(s.as_str()),
        }
    }

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(RequestId::Number)
                .ok_or(DecodeError::InvalidIdType),
            Value::String(s) => Ok(RequestId::String(s.clone())),
            _ => Err(DecodeError::InvalidIdType),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// A request expecting exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Optional parameters.
    pub params: Option<Value>,
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered.
    pub id: RequestId,
    /// Result payload.
    pub result: Value,
}

/// A one-way message; never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Optional parameters.
    pub params: Option<Value>,
}

/// A failed response. `id` is `None` when the failure could not be
/// attributed to a request (encoded as `"id": null`).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// Id of the request being answered, if known.
    pub id: Option<RequestId>,
    /// The error object.
    pub error: JsonRpcError,
}

/// Any JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// See [`Request`].
    Request(Request),
    /// See [`Response`].
    Response(Response),
    /// See [`Notification`].
    Notification(Notification),
    /// See [`ErrorResponse`].
    Error(ErrorResponse),
}

impl Message {
    /// Builds a request message.
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request(Request {
            id,
            method: method.into(),
            params,
        })
    }

    /// Builds a response message.
    pub fn response(id: RequestId, result: Value) -> Self {
        Message::Response(Response { id, result })
    }

    /// Builds a notification message.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Builds an error response.
    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Message::Error(ErrorResponse { id, error })
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// Correlation id, when the message carries one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Response(r) => Some(&r.id),
            Message::Error(e) => e.id.as_ref(),
            Message::Notification(_) => None,
        }
    }
}

/// Why an envelope was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    /// The frame is not valid JSON.
    NotJson(String),
    /// The frame is JSON but not an object.
    NotAnObject,
    /// `jsonrpc` is missing or not `"2.0"`.
    Version,
    /// `method` is present but not a string.
    MethodNotString,
    /// `error` is present but not an object, or its fields have the wrong type.
    ErrorObject,
    /// The object matches none of the four message shapes.
    Unclassifiable,
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::NotJson(e) => write!(f, "not JSON ({e})"),
            Malformed::NotAnObject => f.write_str("not a JSON object"),
            Malformed::Version => f.write_str("jsonrpc must be \"2.0\""),
            Malformed::MethodNotString => f.write_str("method must be a string"),
            Malformed::ErrorObject => f.write_str("error must be an object with an integer code"),
            Malformed::Unclassifiable => {
                f.write_str("not a request, response, notification or error")
            }
        }
    }
}

/// Failure to decode a single frame. Never fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The envelope is structurally invalid.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(Malformed),

    /// A required member is absent.
    #[error("missing field: {0}")]
    MissingField(String),

    /// `id` is neither a string nor an integer.
    #[error("invalid id type")]
    InvalidIdType,
}

impl DecodeError {
    /// JSON-RPC code used when answering a frame that failed to decode.
    pub fn code(&self) -> i64 {
        match self {
            DecodeError::MalformedEnvelope(Malformed::NotJson(_)) => PARSE_ERROR,
            _ => INVALID_REQUEST,
        }
    }
}

/// Serialize a message into a single-line frame.
///
/// Never fails: every [`Message`] is representable, and JSON string
/// escaping guarantees the frame contains no raw newline.
pub fn encode(message: &Message) -> String {
    let mut obj = Map::new();
    obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
    match message {
        Message::Request(r) => {
            obj.insert("id".into(), r.id.to_value());
            obj.insert("method".into(), Value::from(r.method.as_str()));
            if let Some(params) = &r.params {
                obj.insert("params".into(), params.clone());
            }
        }
        Message::Response(r) => {
            obj.insert("id".into(), r.id.to_value());
            obj.insert("result".into(), r.result.clone());
        }
        Message::Notification(n) => {
            obj.insert("method".into(), Value::from(n.method.as_str()));
            if let Some(params) = &n.params {
                obj.insert("params".into(), params.clone());
            }
        }
        Message::Error(e) => {
            obj.insert(
                "id".into(),
                e.id.as_ref().map(RequestId::to_value).unwrap_or(Value::Null),
            );
            let mut err = Map::new();
            err.insert("code".into(), Value::from(e.error.code));
            err.insert("message".into(), Value::from(e.error.message.as_str()));
            if let Some(data) = &e.error.data {
                err.insert("data".into(), data.clone());
            }
            obj.insert("error".into(), Value::Object(err));
        }
    }
    Value::Object(obj).to_string()
}

/// Parse a frame into a [`Message`].
///
/// # Errors
///
/// Returns [`DecodeError::MalformedEnvelope`] for non-JSON, non-object,
/// wrong-version or unclassifiable frames, [`DecodeError::MissingField`]
/// when a required member is absent, and [`DecodeError::InvalidIdType`]
/// when `id` is not a string or integer.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::codec::{decode, Message};
///
/// let msg = decode(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
/// assert!(matches!(msg, Message::Request(_)));
/// ```
pub fn decode(frame: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| DecodeError::MalformedEnvelope(Malformed::NotJson(e.to_string())))?;
    let obj = value
        .as_object()
        .ok_or(DecodeError::MalformedEnvelope(Malformed::NotAnObject))?;

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(DecodeError::MalformedEnvelope(Malformed::Version));
    }

    if let Some(method) = obj.get("method") {
        let method = method
            .as_str()
            .ok_or(DecodeError::MalformedEnvelope(Malformed::MethodNotString))?
            .to_string();
        let params = obj.get("params").cloned();
        return match obj.get("id") {
            Some(id) => Ok(Message::Request(Request {
                id: RequestId::from_value(id)?,
                method,
                params,
            })),
            None => Ok(Message::Notification(Notification { method, params })),
        };
    }

    if let Some(error) = obj.get("error") {
        let id = match obj.get("id") {
            None => return Err(DecodeError::MissingField("id".into())),
            Some(Value::Null) => None,
            Some(id) => Some(RequestId::from_value(id)?),
        };
        return Ok(Message::Error(ErrorResponse {
            id,
            error: decode_error_object(error)?,
        }));
    }

    if let Some(result) = obj.get("result") {
        let id = obj
            .get("id")
            .ok_or_else(|| DecodeError::MissingField("id".into()))?;
        return Ok(Message::Response(Response {
            id: RequestId::from_value(id)?,
            result: result.clone(),
        }));
    }

    if obj.contains_key("id") {
        return Err(DecodeError::MissingField("result".into()));
    }
    Err(DecodeError::MalformedEnvelope(Malformed::Unclassifiable))
}

fn decode_error_object(error: &Value) -> Result<JsonRpcError, DecodeError> {
    let obj = error
        .as_object()
        .ok_or(DecodeError::MalformedEnvelope(Malformed::ErrorObject))?;
    let code = obj
        .get("code")
        .ok_or_else(|| DecodeError::MissingField("error.code".into()))?
        .as_i64()
        .ok_or(DecodeError::MalformedEnvelope(Malformed::ErrorObject))?;
    let message = obj
        .get("message")
        .ok_or_else(|| DecodeError::MissingField("error.message".into()))?
        .as_str()
        .ok_or(DecodeError::MalformedEnvelope(Malformed::ErrorObject))?
        .to_string();
    Ok(JsonRpcError {
        code,
        message,
        data: obj.get("data").cloned(),
    })
}

/// The error response to send back for a frame that failed to decode.
///
/// Frames that look like requests with a usable id are answered against that
/// id. Frames that look like responses are never answered, to avoid two peers
/// bouncing errors at each other. Everything else gets an error with a null
/// id.
pub fn error_reply_for(frame: &str, error: &DecodeError) -> Option<Message> {
    let rpc_error = JsonRpcError::new(error.code(), error.to_string());
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(frame) else {
        return Some(Message::error(None, rpc_error));
    };
    if obj.contains_key("result") || obj.contains_key("error") {
        return None;
    }
    let id = if obj.contains_key("method") {
        obj.get("id")
            .and_then(|id| RequestId::from_value(id).ok())
    } else {
        None
    };
    Some(Message::error(id, rpc_error))
}
