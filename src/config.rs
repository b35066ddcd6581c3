//! Configuration management for mcp-cli
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! Later sources win: file, then `MCP_CLI_*` environment variables, then
//! command-line flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{McpError, Result};
use crate::mcp::types::{CapabilitySet, Implementation};

/// Main configuration structure for mcp-cli
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Session-wide settings shared by both roles
    #[serde(default)]
    pub session: SessionSettings,

    /// Client identity and declared capabilities
    #[serde(default)]
    pub client: ClientConfig,

    /// Server identity, declared capabilities and instructions
    #[serde(default)]
    pub server: ServerConfig,

    /// Consent policy for delegated sampling
    #[serde(default)]
    pub consent: ConsentConfig,

    /// Inference backend answering allowed sampling requests
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    /// Deadline for every outbound request in milliseconds; `0` disables it
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Client identity and capabilities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Reported as `clientInfo.name`
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Reported as `clientInfo.version`
    #[serde(default = "default_version")]
    pub version: String,

    /// Optional display title
    #[serde(default)]
    pub title: Option<String>,

    /// Declared capability set
    #[serde(default = "default_client_capabilities")]
    pub capabilities: CapabilitySet,
}

fn default_client_name() -> String {
    "mcp-cli-client".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_client_capabilities() -> CapabilitySet {
    CapabilitySet::new()
        .with("sampling", json!({}))
        .with("roots", json!({"listChanged": true}))
        .with("tools", json!({}))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_version(),
            title: None,
            capabilities: default_client_capabilities(),
        }
    }
}

/// Server identity, capabilities and instructions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Reported as `serverInfo.name`
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Reported as `serverInfo.version`
    #[serde(default = "default_version")]
    pub version: String,

    /// Optional display title
    #[serde(default)]
    pub title: Option<String>,

    /// Declared capability set
    #[serde(default = "default_server_capabilities")]
    pub capabilities: CapabilitySet,

    /// Instructions returned with the handshake
    #[serde(default = "default_instructions")]
    pub instructions: Option<String>,
}

fn default_server_name() -> String {
    "mcp-cli-server".to_string()
}

fn default_server_capabilities() -> CapabilitySet {
    CapabilitySet::new()
        .with("logging", json!({}))
        .with("prompts", json!({"listChanged": true}))
        .with("resources", json!({"subscribe": true, "listChanged": true}))
        .with("tools", json!({"listChanged": true}))
        .with("sampling", json!({}))
}

fn default_instructions() -> Option<String> {
    Some("Review capabilities and proceed with sampling delegation when ready.".to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_version(),
            title: None,
            capabilities: default_server_capabilities(),
            instructions: default_instructions(),
        }
    }
}

/// How sampling requests are ruled on
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMode {
    /// Allow every request
    #[default]
    Allow,
    /// Deny every request
    Deny,
    /// Apply the rules in [`ConsentConfig`]
    Rules,
}

/// Consent policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsentConfig {
    /// Policy kind
    #[serde(default)]
    pub mode: ConsentMode,

    /// `rules` mode: servers allowed to request sampling (empty allows any)
    #[serde(default)]
    pub allowed_servers: Vec<String>,

    /// `rules` mode: largest `maxTokens` allowed
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// `rules` mode: case-insensitive regular expressions that deny a
    /// request when they match its text
    #[serde(default)]
    pub blocked_patterns: Vec<String>,

    /// `deny` mode: reason reported to the server
    #[serde(default)]
    pub deny_reason: Option<String>,
}

/// Inference backend kind
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Fixed reply, no network access
    #[default]
    Static,
    /// OpenAI-compatible chat completions server
    LocalLlm,
}

/// Inference backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Backend kind
    #[serde(default)]
    pub kind: BackendKind,

    /// Base URL of the chat completions server
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Model name sent to the server and reported in results
    #[serde(default = "default_backend_model")]
    pub model: String,

    /// Temperature used when the request does not set one
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Token budget of the demo's delegated request
    #[serde(default = "default_backend_max_tokens")]
    pub max_tokens: u32,

    /// HTTP timeout in milliseconds
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,

    /// Reply of the static backend
    #[serde(default = "default_static_reply")]
    pub static_reply: String,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_backend_model() -> String {
    "local-llm".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_backend_max_tokens() -> u32 {
    512
}

fn default_backend_timeout_ms() -> u64 {
    60_000
}

fn default_static_reply() -> String {
    "Sampling delegation completed: the client answered on behalf of its local model."
        .to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: default_backend_url(),
            model: default_backend_model(),
            temperature: default_temperature(),
            max_tokens: default_backend_max_tokens(),
            timeout_ms: default_backend_timeout_ms(),
            static_reply: default_static_reply(),
        }
    }
}

impl Config {
    /// Load configuration from file with CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| McpError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("MCP_CLI_BACKEND_URL") {
            self.backend.url = url;
            self.backend.kind = BackendKind::LocalLlm;
        }

        if let Ok(model) = std::env::var("MCP_CLI_BACKEND_MODEL") {
            self.backend.model = model;
        }

        if let Ok(timeout) = std::env::var("MCP_CLI_REQUEST_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse() {
                self.session.request_timeout_ms = value;
            } else {
                tracing::warn!("Invalid MCP_CLI_REQUEST_TIMEOUT_MS: {}", timeout);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        let demo = cli.demo_args();
        if let Some(instructions) = demo.instructions {
            self.server.instructions = Some(instructions);
        }
        if demo.deny_sampling {
            self.consent.mode = ConsentMode::Deny;
        }
        if let Some(url) = demo.backend_url {
            self.backend.url = url;
            self.backend.kind = BackendKind::LocalLlm;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.client.name.trim().is_empty() {
            return Err(McpError::Config("client.name cannot be empty".to_string()));
        }

        if self.server.name.trim().is_empty() {
            return Err(McpError::Config("server.name cannot be empty".to_string()));
        }

        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(McpError::Config(
                "backend.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.backend.max_tokens == 0 {
            return Err(McpError::Config(
                "backend.max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.backend.timeout_ms == 0 {
            return Err(McpError::Config(
                "backend.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.backend.kind == BackendKind::LocalLlm
            && !(self.backend.url.starts_with("http://") || self.backend.url.starts_with("https://"))
        {
            return Err(McpError::Config(format!(
                "backend.url must be an http(s) URL, got '{}'",
                self.backend.url
            )));
        }

        for pattern in &self.consent.blocked_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                McpError::Config(format!("invalid consent.blocked_patterns entry '{pattern}': {e}"))
            })?;
        }

        Ok(())
    }

    /// Session deadline, `None` when disabled
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.session.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// The client's `clientInfo`
    pub fn client_info(&self) -> Implementation {
        Implementation {
            name: self.client.name.clone(),
            version: self.client.version.clone(),
            title: self.client.title.clone(),
        }
    }

    /// The server's `serverInfo`
    pub fn server_info(&self) -> Implementation {
        Implementation {
            name: self.server.name.clone(),
            version: self.server.version.clone(),
            title: self.server.title.clone(),
        }
    }
}
