//! Demo command handler
//!
//! Runs a client and a server over an in-memory transport pair:
//! handshake, tool discovery, then a `tools/call` whose handler asks the
//! client's model for the answer through `sampling/createMessage`.

use std::sync::Arc;

use colored::Colorize;
use serde_json::json;

use crate::cli::DemoArgs;
use crate::config::Config;
use crate::error::{McpError, Result};
use crate::mcp::backend::backend_from_config;
use crate::mcp::client::{ClientOptions, ClientRole};
use crate::mcp::consent::policy_from_config;
use crate::mcp::negotiation::HandshakeResult;
use crate::mcp::server::{DelegatingTool, ServerRole};
use crate::mcp::session::SessionConfig;
use crate::mcp::telemetry::{EventSink, TracingSink};
use crate::mcp::transport::memory::MemoryTransport;
use crate::mcp::types::{CallToolResult, CreateMessageResult};

/// Name of the tool the demo server exposes.
pub const DEMO_TOOL: &str = "ask";

/// Prompt used when `--prompt` is not given.
pub const DEFAULT_PROMPT: &str = "Summarize what MCP sampling delegation is in one sentence.";

/// How the delegated round trip ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DemoReply {
    /// The client's backend produced an answer.
    Completed {
        /// Generated text.
        text: String,
        /// Model reported by the client.
        model: String,
    },
    /// The client's consent policy refused the request.
    Refused {
        /// Text of the tool's error result.
        reason: String,
    },
}

/// Everything the demo observed.
#[derive(Debug, Clone)]
pub struct DemoOutcome {
    /// Client-side view of the handshake.
    pub handshake: HandshakeResult,
    /// Names returned by `tools/list`.
    pub tools: Vec<String>,
    /// Result of the delegated call.
    pub reply: DemoReply,
}

/// Run the demo and print its progress.
///
/// # Errors
///
/// Returns an error naming the failure kind when negotiation or the
/// delegated round trip fails. A consent refusal is not an error.
pub async fn run_demo(config: Config, args: DemoArgs) -> anyhow::Result<()> {
    let prompt = args.prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    tracing::info!("Starting demo with prompt: {}", prompt);

    let outcome = execute(&config, &prompt, Arc::new(TracingSink))
        .await
        .map_err(|e| anyhow::anyhow!("{}: {}", e.kind(), e))?;

    print_outcome(&outcome);
    Ok(())
}

/// Run the demo without printing.
///
/// # Errors
///
/// Returns the first protocol, backend or configuration failure.
pub async fn execute(
    config: &Config,
    prompt: &str,
    events: Arc<dyn EventSink>,
) -> Result<DemoOutcome> {
    let (client_side, server_side) = MemoryTransport::pair();

    let mut builder = ServerRole::builder(config.server_info(), config.server.capabilities.clone())
        .session_config(session_config("server", config, events.clone()))
        .tool(
            DelegatingTool::new(DEMO_TOOL)
                .system_prompt("You are a concise assistant.")
                .max_tokens(config.backend.max_tokens),
        );
    if let Some(instructions) = &config.server.instructions {
        builder = builder.instructions(instructions.clone());
    }
    let server = builder.serve(server_side);

    let options = ClientOptions::new(config.client_info(), config.client.capabilities.clone())
        .consent(policy_from_config(&config.consent)?)
        .backend(backend_from_config(&config.backend)?)
        .session_config(session_config("client", config, events));
    let client = ClientRole::connect(client_side, options);

    let result = round_trip(&client, prompt).await;

    client.shutdown();
    server.shutdown();
    client.closed().await;
    server.closed().await;

    result
}

async fn round_trip(client: &ClientRole, prompt: &str) -> Result<DemoOutcome> {
    let handshake = client.initialize().await?;
    tracing::debug!(
        "Negotiated protocol {} with {}",
        handshake.protocol_version,
        handshake.server_info.name
    );

    let tools: Vec<String> = client
        .list_tools()
        .await?
        .into_iter()
        .map(|tool| tool.name)
        .collect();

    let result = client
        .call_tool(DEMO_TOOL, Some(json!({ "prompt": prompt })))
        .await?;

    let reply = reply_from(&result)?;

    Ok(DemoOutcome {
        handshake,
        tools,
        reply,
    })
}

/// Interpret the delegating tool's result.
fn reply_from(result: &CallToolResult) -> Result<DemoReply> {
    if result.is_error.unwrap_or(false) {
        return Ok(DemoReply::Refused {
            reason: result.joined_text(),
        });
    }
    let structured = result.structured_content.clone().ok_or_else(|| {
        McpError::MalformedResult("tool result carries no sampling result".to_string())
    })?;
    let sample: CreateMessageResult = serde_json::from_value(structured)?;
    Ok(DemoReply::Completed {
        text: result.joined_text(),
        model: sample.model,
    })
}

fn session_config(label: &str, config: &Config, events: Arc<dyn EventSink>) -> SessionConfig {
    SessionConfig {
        label: label.to_string(),
        default_timeout: config.request_timeout(),
        events,
    }
}

fn print_outcome(outcome: &DemoOutcome) {
    let handshake = &outcome.handshake;
    println!("{}", "Handshake complete".green().bold());
    println!("  protocol:     {}", handshake.protocol_version);
    println!(
        "  client:       {} {}",
        handshake.client_info.name, handshake.client_info.version
    );
    println!(
        "  server:       {} {}",
        handshake.server_info.name, handshake.server_info.version
    );
    println!("  negotiated:   {}", names(&handshake.negotiated));
    if let Some(instructions) = &handshake.instructions {
        println!("  instructions: {}", instructions);
    }
    println!("  tools:        {}", outcome.tools.join(", "));
    println!();

    match &outcome.reply {
        DemoReply::Completed { text, model } => {
            println!("{} ({})", "Sampling completed".green().bold(), model.cyan());
            println!("{}", text);
        }
        DemoReply::Refused { reason } => {
            println!("{}", "Sampling refused".yellow().bold());
            println!("{}", reason);
        }
    }
}

fn names(set: &crate::mcp::types::CapabilitySet) -> String {
    let names: Vec<&str> = set.names().collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}
