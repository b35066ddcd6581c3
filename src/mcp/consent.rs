//! Consent policies for delegated sampling
//!
//! A server that asks the client for an LLM completion is asking to spend
//! the user's model budget. Before the client consults its inference
//! backend, a [`ConsentPolicy`] rules on every `sampling/createMessage`
//! request. A denial travels back as a refusal result, never as an error.
//!
//! Policies are pure and shared across sessions behind an `Arc`.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::config::{ConsentConfig, ConsentMode};
use crate::error::{McpError, Result};
use crate::mcp::types::{CreateMessageRequest, Implementation};

/// Who is asking for a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterIdentity {
    /// Server name from its `serverInfo`.
    pub server_name: String,
    /// Server version from its `serverInfo`.
    pub server_version: Option<String>,
    /// Label of the client session the request arrived on.
    pub session: String,
}

impl RequesterIdentity {
    /// Identity taken from the peer's handshake info.
    pub fn from_peer(peer: Option<&Implementation>, session: impl Into<String>) -> Self {
        Self {
            server_name: peer.map(|p| p.name.clone()).unwrap_or_else(|| "unknown".into()),
            server_version: peer.map(|p| p.version.clone()),
            session: session.into(),
        }
    }
}

/// The ruling on one sampling request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentDecision {
    /// Forward the request to the backend.
    Allow,
    /// Refuse without consulting the backend.
    Deny {
        /// Reported to the requesting server.
        reason: String,
    },
}

impl ConsentDecision {
    /// Shorthand for a denial.
    pub fn deny(reason: impl Into<String>) -> Self {
        ConsentDecision::Deny {
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`ConsentDecision::Allow`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, ConsentDecision::Allow)
    }
}

/// Decides whether a sampling request may reach the inference backend.
pub trait ConsentPolicy: Send + Sync + std::fmt::Debug {
    /// Rule on `request` from `requester`. Must not block.
    fn decide(&self, requester: &RequesterIdentity, request: &CreateMessageRequest)
        -> ConsentDecision;
}

/// Allows every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ConsentPolicy for AllowAll {
    fn decide(&self, _: &RequesterIdentity, _: &CreateMessageRequest) -> ConsentDecision {
        ConsentDecision::Allow
    }
}

/// Denies every request with a fixed reason.
#[derive(Debug, Clone)]
pub struct DenyAll {
    reason: String,
}

impl DenyAll {
    /// Deny with `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for DenyAll {
    fn default() -> Self {
        Self::new("sampling denied by user policy")
    }
}

impl ConsentPolicy for DenyAll {
    fn decide(&self, _: &RequesterIdentity, _: &CreateMessageRequest) -> ConsentDecision {
        ConsentDecision::deny(self.reason.clone())
    }
}

/// Rule-based policy.
///
/// Rules are checked in order: requester allowlist, token cap, then
/// blocked patterns. The first failing rule produces the denial.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::consent::{ConsentPolicy, ConsentRules, RequesterIdentity};
/// use mcp_cli::mcp::types::CreateMessageRequest;
///
/// let rules = ConsentRules::new()
///     .allow_server("demo-server")
///     .max_tokens(256)
///     .block_pattern(r"\bpassword\b")
///     .unwrap();
///
/// let who = RequesterIdentity {
///     server_name: "demo-server".into(),
///     server_version: None,
///     session: "client".into(),
/// };
/// assert!(rules.decide(&who, &CreateMessageRequest::new("hi", 64)).is_allowed());
/// assert!(!rules.decide(&who, &CreateMessageRequest::new("hi", 1024)).is_allowed());
/// assert!(!rules.decide(&who, &CreateMessageRequest::new("my Password", 64)).is_allowed());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConsentRules {
    /// Empty means any server.
    allowed_servers: Vec<String>,
    max_tokens: Option<u32>,
    blocked: Vec<Regex>,
}

impl ConsentRules {
    /// Rules that allow everything until configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit requests from `name`. Once any server is listed, unlisted
    /// servers are denied.
    pub fn allow_server(mut self, name: impl Into<String>) -> Self {
        self.allowed_servers.push(name.into());
        self
    }

    /// Deny requests asking for more than `limit` tokens.
    pub fn max_tokens(mut self, limit: u32) -> Self {
        self.max_tokens = Some(limit);
        self
    }

    /// Deny requests whose text matches `pattern` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Config`] for an invalid regular expression.
    pub fn block_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| McpError::Config(format!("invalid consent pattern '{pattern}': {e}")))?;
        self.blocked.push(regex);
        Ok(self)
    }
}

impl ConsentPolicy for ConsentRules {
    fn decide(
        &self,
        requester: &RequesterIdentity,
        request: &CreateMessageRequest,
    ) -> ConsentDecision {
        if !self.allowed_servers.is_empty()
            && !self
                .allowed_servers
                .iter()
                .any(|name| name == &requester.server_name)
        {
            return ConsentDecision::deny(format!(
                "server '{}' is not allowed to request sampling",
                requester.server_name
            ));
        }

        if let Some(limit) = self.max_tokens {
            if request.max_tokens > limit {
                return ConsentDecision::deny(format!(
                    "requested {} tokens exceeds the limit of {limit}",
                    request.max_tokens
                ));
            }
        }

        let texts = request
            .system_prompt
            .iter()
            .map(String::as_str)
            .chain(request.messages.iter().filter_map(|m| m.content.as_text()));
        for text in texts {
            if let Some(pattern) = self.blocked.iter().find(|p| p.is_match(text)) {
                return ConsentDecision::deny(format!(
                    "request matches blocked pattern '{}'",
                    pattern.as_str()
                ));
            }
        }

        ConsentDecision::Allow
    }
}

/// Build the policy described by the `consent` config section.
///
/// # Errors
///
/// Returns [`McpError::Config`] when a blocked pattern does not compile.
pub fn policy_from_config(config: &ConsentConfig) -> Result<Arc<dyn ConsentPolicy>> {
    let policy: Arc<dyn ConsentPolicy> = match config.mode {
        ConsentMode::Allow => Arc::new(AllowAll),
        ConsentMode::Deny => Arc::new(match &config.deny_reason {
            Some(reason) => DenyAll::new(reason.clone()),
            None => DenyAll::default(),
        }),
        ConsentMode::Rules => {
            let mut rules = ConsentRules::new();
            for server in &config.allowed_servers {
                rules = rules.allow_server(server.clone());
            }
            if let Some(limit) = config.max_tokens {
                rules = rules.max_tokens(limit);
            }
            for pattern in &config.blocked_patterns {
                rules = rules.block_pattern(pattern)?;
            }
            Arc::new(rules)
        }
    };
    tracing::debug!(mode = ?config.mode, "consent policy configured");
    Ok(policy)
}
