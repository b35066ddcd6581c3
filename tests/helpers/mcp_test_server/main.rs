//! MCP test server binary for integration tests
//!
//! Serves the library's [`ServerRole`] over stdin/stdout using
//! newline-delimited JSON. It is used exclusively by integration tests to
//! exercise the stdio transport against a real subprocess.
//!
//! # Registered Items
//!
//! - tool `echo` -- returns its `message` argument
//! - tool `ask` -- delegates its `prompt` argument to the client through
//!   `sampling/createMessage`
//! - resource `mem://greeting` -- fixed text
//! - prompt `greet` -- one user message rendered from `{{name}}`
//!
//! Declared capabilities: `tools`, `resources`, `prompts`, `sampling`.
//! The process exits when stdin closes.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_cli::error::{McpError, Result};
use mcp_cli::mcp::server::{
    DelegatingTool, PromptTemplate, ServerRole, StaticResource, ToolContext, ToolHandler,
};
use mcp_cli::mcp::transport::stdio::StdioTransport;
use mcp_cli::mcp::types::{
    CallToolResult, CapabilitySet, Implementation, Prompt, PromptArgument, Resource,
    ResourceContents, Role, TextResourceContents, ToolDefinition,
};

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            title: None,
            description: Some("Echoes the input message back".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string", "description": "The message to echo"}
                },
                "required": ["message"]
            }),
        }
    }

    async fn call(&self, arguments: Value, _context: ToolContext) -> Result<CallToolResult> {
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::InvalidParams("missing string argument 'message'".into()))?;
        Ok(CallToolResult::text(message))
    }
}

#[tokio::main]
async fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let capabilities = CapabilitySet::new()
        .with("tools", json!({}))
        .with("resources", json!({}))
        .with("prompts", json!({}))
        .with("sampling", json!({}));

    let server = ServerRole::builder(
        Implementation::new("mcp-test-server", env!("CARGO_PKG_VERSION")),
        capabilities,
    )
    .instructions("Integration test server")
    .tool(EchoTool)
    .tool(DelegatingTool::new("ask"))
    .resource(StaticResource {
        resource: Resource {
            uri: "mem://greeting".to_string(),
            name: "greeting".to_string(),
            description: None,
            mime_type: Some("text/plain".to_string()),
        },
        contents: ResourceContents::Text(TextResourceContents {
            uri: "mem://greeting".to_string(),
            mime_type: Some("text/plain".to_string()),
            text: "hello from the test server".to_string(),
        }),
    })
    .prompt(PromptTemplate {
        prompt: Prompt {
            name: "greet".to_string(),
            description: Some("Greets someone".to_string()),
            arguments: vec![PromptArgument {
                name: "name".to_string(),
                description: None,
                required: Some(true),
            }],
        },
        messages: vec![(Role::User, "Say hello to {{name}}.".to_string())],
    })
    .serve(StdioTransport::from_stdio());

    server.closed().await;
}
