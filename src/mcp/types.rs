//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the wire types exchanged by the client and server
//! roles: protocol revision constants, method names, error codes, the
//! capability set used during negotiation, and the payloads of every
//! operation the engine understands (initialize, tools, resources, prompts,
//! sampling). Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`, and `Option<>` fields omit their key
//! from JSON when `None`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::mcp::codec::RequestId;

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// The most recent supported MCP protocol revision.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Earlier protocol revision retained for backwards compatibility.
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";

/// All protocol versions accepted during negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[LATEST_PROTOCOL_VERSION, PROTOCOL_VERSION_2025_03_26];

/// Returns `true` when `version` is one of [`SUPPORTED_PROTOCOL_VERSIONS`].
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

// ---------------------------------------------------------------------------
// JSON-RPC method constants
// ---------------------------------------------------------------------------

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends `notifications/initialized` after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Short form of [`METHOD_INITIALIZED`] accepted from older peers.
pub const METHOD_INITIALIZED_SHORT: &str = "initialized";
/// Keepalive ping.
pub const METHOD_PING: &str = "ping";
/// Request the available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Request the available resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Read the contents of a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Request the available prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Retrieve a rendered prompt by name.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
/// Server-initiated: ask the client to generate a completion sample.
pub const METHOD_SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
/// Either side asks the peer to abandon an in-flight request.
pub const METHOD_CANCEL_REQUEST: &str = "$/cancelRequest";

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal error while handling the request.
pub const INTERNAL_ERROR: i64 = -32603;
/// The operation requires a capability outside the negotiated set.
pub const CAPABILITY_NOT_GRANTED: i64 = -32010;
/// The operation was attempted before negotiation completed.
pub const NOT_NEGOTIATED: i64 = -32011;
/// The inference backend failed while answering a sampling request.
pub const SAMPLING_BACKEND_ERROR: i64 = -32012;
/// The request was cancelled by its sender.
pub const REQUEST_CANCELLED: i64 = -32800;

/// The `error` member of a JSON-RPC 2.0 error response.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::types::{JsonRpcError, METHOD_NOT_FOUND};
///
/// let err = JsonRpcError::new(METHOD_NOT_FOUND, "Method not found: nope");
/// assert_eq!(err.to_string(), "JSON-RPC error -32601: Method not found: nope");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Creates an error object without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation (e.g. `"mcp-cli"`).
    pub name: String,
    /// Version string (e.g. `"0.1.0"`).
    pub version: String,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Implementation {
    /// Builds an implementation record without a title.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            title: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A named set of capabilities, each with an opaque JSON descriptor.
///
/// Serializes as a plain JSON object (`{"tools": {}, "sampling": {}}`).
/// Names are kept sorted so that two equal sets always encode identically.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::types::CapabilitySet;
/// use serde_json::json;
///
/// let server = CapabilitySet::new().with("tools", json!({})).with("logging", json!({}));
/// let client = CapabilitySet::new().with("tools", json!({})).with("sampling", json!({}));
/// let negotiated = server.intersect(&client);
/// assert_eq!(negotiated.names().collect::<Vec<_>>(), vec!["tools"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeMap<String, Value>);

impl CapabilitySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, descriptor: Value) -> Self {
        self.insert(name, descriptor);
        self
    }

    /// Adds or replaces a capability.
    pub fn insert(&mut self, name: impl Into<String>, descriptor: Value) {
        self.0.insert(name.into(), descriptor);
    }

    /// Returns `true` when `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Descriptor for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Capability names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of capabilities in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Computes the negotiated set with `self` as the server's declaration.
    ///
    /// Only names present on both sides survive. Each surviving descriptor
    /// is the server's, capped by the client's: numeric fields take the
    /// minimum, boolean fields are AND-ed, nested objects are capped
    /// recursively and all other fields keep the server's value. Both roles
    /// call this with the server's set as receiver so they agree on the
    /// result.
    pub fn intersect(&self, client: &CapabilitySet) -> CapabilitySet {
        let map = self
            .0
            .iter()
            .filter_map(|(name, server_desc)| {
                client
                    .0
                    .get(name)
                    .map(|client_desc| (name.clone(), cap_descriptor(server_desc, client_desc)))
            })
            .collect();
        CapabilitySet(map)
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        CapabilitySet(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn cap_descriptor(server: &Value, client: &Value) -> Value {
    match (server, client) {
        (Value::Bool(s), Value::Bool(c)) => Value::Bool(*s && *c),
        (Value::Number(s), Value::Number(c)) => {
            if let (Some(s), Some(c)) = (s.as_i64(), c.as_i64()) {
                Value::from(s.min(c))
            } else {
                match (s.as_f64(), c.as_f64()) {
                    (Some(s), Some(c)) => Value::from(s.min(c)),
                    _ => server.clone(),
                }
            }
        }
        (Value::Object(s), Value::Object(c)) => Value::Object(
            s.iter()
                .map(|(key, sv)| {
                    let capped = match c.get(key) {
                        Some(cv) => cap_descriptor(sv, cv),
                        None => sv.clone(),
                    };
                    (key.clone(), capped)
                })
                .collect(),
        ),
        _ => server.clone(),
    }
}

// ---------------------------------------------------------------------------
// Initialize
// ---------------------------------------------------------------------------

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Capabilities advertised by this client.
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Information identifying this client implementation.
    pub client_info: Implementation,
}

/// Result returned by the server to an `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// The protocol version the server has selected for this session.
    pub protocol_version: String,
    /// Capabilities advertised by this server.
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Information identifying this server implementation.
    pub server_info: Implementation,
    /// Optional human-readable instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message from the human user.
    User,
    /// A message from the AI assistant.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// A content block, discriminated by `"type"` on the wire.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::types::Content;
///
/// let c = Content::text("hello");
/// let json = serde_json::to_value(&c).unwrap();
/// assert_eq!(json["type"], "text");
/// assert_eq!(c.as_text(), Some("hello"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image (e.g. `"image/png"`).
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents.
        resource: ResourceContents,
    },
}

impl Content {
    /// Shorthand for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    /// The text body, for text blocks.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A tool exposed by a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique name of the tool within the server.
    pub name: String,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description of the tool's purpose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

/// Result of a `tools/list` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Registered tools, in registration order.
    pub tools: Vec<ToolDefinition>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments to pass to the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// The content items produced by the tool.
    pub content: Vec<Content>,
    /// When `true`, the tool signalled an error condition within its content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Structured output, when the tool produces any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// A successful result holding one text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            ..Default::default()
        }
    }

    /// A tool-level failure holding one text block.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: Some(true),
            structured_content: None,
        }
    }

    /// Concatenation of every text block.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Text-based resource contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextResourceContents {
    /// Canonical URI that identifies this resource.
    pub uri: String,
    /// MIME type of the text (e.g. `"text/plain"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// The text content of the resource.
    pub text: String,
}

/// Binary resource contents, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobResourceContents {
    /// Canonical URI that identifies this resource.
    pub uri: String,
    /// MIME type of the binary data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded binary data.
    pub blob: String,
}

/// Either text or binary resource contents, told apart by `"text"` vs `"blob"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResourceContents {
    /// UTF-8 text resource.
    Text(TextResourceContents),
    /// Binary resource.
    Blob(BlobResourceContents),
}

/// Metadata describing a resource exposed by a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Canonical URI for this resource.
    pub uri: String,
    /// Human-readable resource name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Result of a `resources/list` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    /// Registered resources.
    pub resources: Vec<Resource>,
    /// Opaque cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// Result of a `resources/read` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceResult {
    /// Current contents of the resource.
    pub contents: Vec<ResourceContents>,
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Describes a single argument accepted by a prompt template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// What this argument controls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When `true`, the caller must supply this argument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// Metadata describing a prompt template exposed by a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Unique name of this prompt.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Argument descriptors for this template.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// Result of a `prompts/list` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    /// Registered prompts.
    pub prompts: Vec<Prompt>,
    /// Opaque cursor for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptParams {
    /// Name of the prompt to retrieve.
    pub name: String,
    /// Template argument substitutions.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub arguments: HashMap<String, String>,
}

/// A single message in a rendered prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    /// Who authored this message.
    pub role: Role,
    /// The message body.
    pub content: Content,
}

/// Result of a `prompts/get` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetPromptResult {
    /// Human-readable description of what this prompt does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The rendered prompt messages.
    pub messages: Vec<PromptMessage>,
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// One message in a sampling conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingMessage {
    /// Who authored this message.
    pub role: Role,
    /// The message body.
    pub content: Content,
}

impl SamplingMessage {
    /// A user-authored text message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::text(text),
        }
    }
}

/// Parameters of `sampling/createMessage`: a server asks the client for an
/// LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    /// Conversation to complete.
    pub messages: Vec<SamplingMessage>,
    /// Optional system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Sequences that end generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Free-form model selection hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_preferences: Option<Value>,
    /// Opaque metadata passed through to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl CreateMessageRequest {
    /// A single-turn request asking for at most `max_tokens` tokens.
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            messages: vec![SamplingMessage::user(prompt)],
            system_prompt: None,
            max_tokens,
            stop_sequences: None,
            temperature: None,
            model_preferences: None,
            metadata: None,
        }
    }
}

/// A completed sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    /// Role of the generated message (always assistant in practice).
    pub role: Role,
    /// Generated content.
    pub content: Content,
    /// Name of the model that produced it.
    pub model: String,
    /// Why generation stopped (e.g. `"endTurn"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Reply sent when consent for a sampling request was denied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingRefusal {
    /// Always `true` on the wire.
    pub refused: bool,
    /// Reason given by the consent policy.
    pub reason: String,
}

/// Outcome of a delegated sampling request.
///
/// A refusal is a successful response carrying `{"refused": true, ...}`,
/// not an error. Any other object, including one with `"refused": false`,
/// must parse as a completion.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SamplingResult {
    /// Consent was denied; the backend was not consulted.
    Refused(SamplingRefusal),
    /// The backend produced a completion.
    Completed(CreateMessageResult),
}

impl<'de> Deserialize<'de> for SamplingResult {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        if value.get("refused").and_then(Value::as_bool) == Some(true) {
            serde_json::from_value(value)
                .map(SamplingResult::Refused)
                .map_err(D::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(SamplingResult::Completed)
                .map_err(D::Error::custom)
        }
    }
}

impl SamplingResult {
    /// Builds a refusal with the given reason.
    pub fn refused(reason: impl Into<String>) -> Self {
        SamplingResult::Refused(SamplingRefusal {
            refused: true,
            reason: reason.into(),
        })
    }

    /// Returns `true` for refusals.
    pub fn is_refused(&self) -> bool {
        matches!(self, SamplingResult::Refused(_))
    }

    /// Generated text for completed text samples.
    pub fn text(&self) -> Option<&str> {
        match self {
            SamplingResult::Completed(result) => result.content.as_text(),
            SamplingResult::Refused(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Parameters of `$/cancelRequest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelRequestParams {
    /// The id of the request being cancelled.
    pub id: RequestId,
}

/// Generic paginated request parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedParams {
    /// Opaque cursor from a previous paged response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
