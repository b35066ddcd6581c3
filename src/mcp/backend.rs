//! Inference backends consulted by the client role
//!
//! The client answers `sampling/createMessage` by turning the request into a
//! [`SamplingPrompt`] and calling [`InferenceBackend::generate`]. Two backends ship
//! with the crate:
//!
//! - [`StaticBackend`] returns a fixed reply. The demo and the tests use it.
//! - [`LocalLlmBackend`] posts to a llama.cpp or other OpenAI-compatible
//!   server at `{base_url}/v1/chat/completions`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{BackendConfig, BackendKind};
use crate::error::{McpError, Result};
use crate::mcp::types::{CreateMessageRequest, Role};

/// Failures raised by an inference backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("request failed: {0}")]
    Http(String),

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The backend answered with a payload we could not read.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The backend refused to generate.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<BackendError> for McpError {
    fn from(error: BackendError) -> Self {
        McpError::SamplingBackend(error.to_string())
    }
}

/// Limits passed alongside the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConstraints {
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Sequences that end generation.
    pub stop: Vec<String>,
    /// Sampling temperature requested by the server, if any.
    pub temperature: Option<f64>,
}

impl GenerationConstraints {
    /// Constraints carried by a sampling request.
    pub fn from_request(request: &CreateMessageRequest) -> Self {
        Self {
            max_tokens: request.max_tokens,
            stop: request.stop_sequences.clone().unwrap_or_default(),
            temperature: request.temperature,
        }
    }
}

/// One text turn of a sampling conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTurn {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub text: String,
}

/// The text of a sampling request, turn by turn.
///
/// Chat backends send each turn as its own message; plain backends use the
/// [`Display`](fmt::Display) rendering: the system prompt first, then one
/// `role: text` line per turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplingPrompt {
    /// System prompt, if the server supplied a non-empty one.
    pub system: Option<String>,
    /// Text messages in order. Non-text content is skipped.
    pub turns: Vec<PromptTurn>,
}

impl SamplingPrompt {
    /// Extract the text conversation from a sampling request.
    pub fn from_request(request: &CreateMessageRequest) -> Self {
        Self {
            system: request
                .system_prompt
                .clone()
                .filter(|system| !system.is_empty()),
            turns: request
                .messages
                .iter()
                .filter_map(|message| {
                    message.content.as_text().map(|text| PromptTurn {
                        role: message.role,
                        text: text.to_string(),
                    })
                })
                .collect(),
        }
    }

    /// A single user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            system: None,
            turns: vec![PromptTurn {
                role: Role::User,
                text: text.into(),
            }],
        }
    }
}

impl fmt::Display for SamplingPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if let Some(system) = &self.system {
            f.write_str(system)?;
            first = false;
        }
        for turn in &self.turns {
            if !first {
                f.write_str("\n")?;
            }
            write!(f, "{}: {}", turn.role, turn.text)?;
            first = false;
        }
        Ok(())
    }
}

/// Produces completions for delegated sampling requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(
        &self,
        prompt: &SamplingPrompt,
        constraints: &GenerationConstraints,
    ) -> std::result::Result<String, BackendError>;

    /// Model name reported in sampling results.
    fn model_name(&self) -> String;
}

/// Render a sampling request as a single prompt string.
///
/// The system prompt comes first, followed by one `role: text` line per
/// text message. Non-text content is skipped.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::backend::render_prompt;
/// use mcp_cli::mcp::types::CreateMessageRequest;
///
/// let mut request = CreateMessageRequest::new("Summarize the report", 64);
/// request.system_prompt = Some("Be brief.".into());
/// assert_eq!(render_prompt(&request), "Be brief.\nuser: Summarize the report");
/// ```
pub fn render_prompt(request: &CreateMessageRequest) -> String {
    SamplingPrompt::from_request(request).to_string()
}

/// Always answers with the same text.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::backend::{GenerationConstraints, InferenceBackend, SamplingPrompt, StaticBackend};
/// use mcp_cli::mcp::types::CreateMessageRequest;
///
/// # tokio_test::block_on(async {
/// let backend = StaticBackend::new("42").with_model("oracle");
/// let constraints = GenerationConstraints::from_request(&CreateMessageRequest::new("6 * 7?", 8));
/// assert_eq!(backend.generate(&SamplingPrompt::user("6 * 7?"), &constraints).await.unwrap(), "42");
/// assert_eq!(backend.model_name(), "oracle");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct StaticBackend {
    reply: String,
    model: String,
}

impl StaticBackend {
    /// A backend that replies `reply` as model `"static"`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            model: "static".to_string(),
        }
    }

    /// Override the reported model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl InferenceBackend for StaticBackend {
    async fn generate(
        &self,
        prompt: &SamplingPrompt,
        _constraints: &GenerationConstraints,
    ) -> std::result::Result<String, BackendError> {
        tracing::debug!(turns = prompt.turns.len(), "static backend answering");
        Ok(self.reply.clone())
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Value>,
    #[serde(default)]
    content: Option<Value>,
}

/// OpenAI-compatible chat completions backend (llama.cpp `server`,
/// LM Studio and the like).
#[derive(Debug, Clone)]
pub struct LocalLlmBackend {
    client: Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl LocalLlmBackend {
    /// Build a backend for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use mcp_cli::mcp::backend::{InferenceBackend, LocalLlmBackend};
    ///
    /// let backend = LocalLlmBackend::new("http://127.0.0.1:8080/", "local-llm", 0.7, Duration::from_secs(60)).unwrap();
    /// assert_eq!(backend.model_name(), "local-llm");
    /// assert_eq!(backend.endpoint(), "http://127.0.0.1:8080/v1/chat/completions");
    /// ```
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        temperature: f64,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mcp-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| McpError::Config(format!("Failed to create HTTP client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();

        tracing::info!("Initialized local LLM backend: url={}, model={}", base_url, model);

        Ok(Self {
            client,
            base_url,
            model,
            temperature,
        })
    }

    /// The chat completions URL requests are posted to.
    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn chat_messages(prompt: &SamplingPrompt) -> Vec<ChatMessage> {
        let system = prompt.system.iter().map(|system| ChatMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
        let turns = prompt.turns.iter().map(|turn| ChatMessage {
            role: turn.role.to_string(),
            content: turn.text.clone(),
        });
        system.chain(turns).collect()
    }

    fn parse_reply(payload: ChatResponse) -> std::result::Result<String, BackendError> {
        let choice = payload.choices.into_iter().next();
        let content = match choice {
            Some(choice) => choice
                .get("message")
                .and_then(|m| m.get("content"))
                .or_else(|| choice.get("text"))
                .cloned(),
            None => payload.content,
        };
        match content {
            Some(Value::String(text)) => Ok(text.trim().to_string()),
            Some(Value::Array(parts)) => Ok(parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
                .trim()
                .to_string()),
            Some(other) => Err(BackendError::MalformedResponse(format!(
                "unexpected content type: {other}"
            ))),
            None => Err(BackendError::MalformedResponse(
                "no choices in response".to_string(),
            )),
        }
    }
}

#[async_trait]
impl InferenceBackend for LocalLlmBackend {
    async fn generate(
        &self,
        prompt: &SamplingPrompt,
        constraints: &GenerationConstraints,
    ) -> std::result::Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: Self::chat_messages(prompt),
            temperature: constraints.temperature.unwrap_or(self.temperature),
            max_tokens: constraints.max_tokens,
            stop: constraints.stop.clone(),
            stream: false,
        };

        tracing::debug!(
            "Sending local LLM request: {} messages, max_tokens={}",
            body.messages.len(),
            constraints.max_tokens
        );

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Local LLM request failed: {}", e);
                BackendError::Http(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Local LLM returned error {}: {}", status, body);
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        Self::parse_reply(payload)
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

/// Build the backend described by the `backend` config section.
///
/// # Errors
///
/// Returns [`McpError::Config`] if the HTTP client cannot be built.
pub fn backend_from_config(config: &BackendConfig) -> Result<Arc<dyn InferenceBackend>> {
    let backend: Arc<dyn InferenceBackend> = match config.kind {
        BackendKind::Static => Arc::new(
            StaticBackend::new(config.static_reply.clone()).with_model(config.model.clone()),
        ),
        BackendKind::LocalLlm => Arc::new(LocalLlmBackend::new(
            config.url.clone(),
            config.model.clone(),
            config.temperature,
            Duration::from_millis(config.timeout_ms),
        )?),
    };
    Ok(backend)
}
