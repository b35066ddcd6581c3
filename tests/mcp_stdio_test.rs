//! MCP stdio transport integration tests
//!
//! Runs a [`ClientRole`] against the `mcp_test_server` subprocess over
//! [`StdioTransport`]: handshake, tool calls, resources, prompts, and a
//! sampling request the child process sends back to this process while its
//! own `tools/call` is still pending.
//!
//! The test harness locates the binary via the `CARGO_BIN_EXE_mcp_test_server`
//! environment variable that Cargo injects when running integration tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mcp_cli::error::McpError;
use mcp_cli::mcp::backend::StaticBackend;
use mcp_cli::mcp::client::{ClientOptions, ClientRole};
use mcp_cli::mcp::consent::DenyAll;
use mcp_cli::mcp::negotiation::NegotiationState;
use mcp_cli::mcp::session::SessionConfig;
use mcp_cli::mcp::transport::stdio::StdioTransport;
use mcp_cli::mcp::types::{
    CapabilitySet, Content, CreateMessageResult, Implementation, ResourceContents,
    INVALID_PARAMS, LATEST_PROTOCOL_VERSION,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns the path to the `mcp_test_server` binary.
fn test_server_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcp_test_server"))
}

fn full_capabilities() -> CapabilitySet {
    CapabilitySet::new()
        .with("tools", json!({}))
        .with("resources", json!({}))
        .with("prompts", json!({}))
        .with("sampling", json!({}))
}

fn options(capabilities: CapabilitySet) -> ClientOptions {
    let mut session = SessionConfig::labelled("stdio-client");
    session.default_timeout = Some(Duration::from_secs(10));
    ClientOptions::new(Implementation::new("stdio-test-client", "0.1.0"), capabilities)
        .backend(Arc::new(
            StaticBackend::new("answer from the parent process").with_model("parent-model"),
        ))
        .session_config(session)
}

fn spawn_client(options: ClientOptions) -> ClientRole {
    let transport = StdioTransport::spawn(test_server_exe(), vec![], HashMap::new(), None)
        .expect("failed to spawn mcp_test_server -- was it built with `cargo build`?");
    ClientRole::connect(transport, options)
}

async fn spawn_and_initialize() -> ClientRole {
    let client = spawn_client(options(full_capabilities()));
    client.initialize().await.expect("initialize failed");
    client
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stdio_handshake() {
    let client = spawn_client(options(full_capabilities()));
    let handshake = client.initialize().await.expect("initialize failed");

    assert_eq!(handshake.protocol_version, LATEST_PROTOCOL_VERSION);
    assert_eq!(handshake.server_info.name, "mcp-test-server");
    assert_eq!(
        handshake.instructions.as_deref(),
        Some("Integration test server")
    );
    let negotiated: Vec<&str> = handshake.negotiated.names().collect();
    assert_eq!(negotiated, vec!["prompts", "resources", "sampling", "tools"]);
    assert_eq!(client.state(), NegotiationState::Negotiated);

    client.ping().await.expect("ping failed");
    client.shutdown();
}

#[tokio::test]
async fn test_stdio_list_and_call_echo() {
    let client = spawn_and_initialize().await;

    let names: Vec<String> = client
        .list_tools()
        .await
        .expect("tools/list failed")
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["ask".to_string(), "echo".to_string()]);

    let result = client
        .call_tool("echo", Some(json!({"message": "hello over stdio"})))
        .await
        .expect("tools/call failed");
    assert_eq!(result.joined_text(), "hello over stdio");
    assert_ne!(result.is_error, Some(true));

    client.shutdown();
}

#[tokio::test]
async fn test_stdio_sampling_round_trip_across_processes() {
    let client = spawn_and_initialize().await;

    let result = client
        .call_tool("ask", Some(json!({"prompt": "What is 2 + 2?"})))
        .await
        .expect("delegating tool failed");

    assert_eq!(result.content, vec![Content::text("answer from the parent process")]);
    let sample: CreateMessageResult =
        serde_json::from_value(result.structured_content.expect("structured content"))
            .expect("sampling result");
    assert_eq!(sample.model, "parent-model");

    client.shutdown();
}

#[tokio::test]
async fn test_stdio_sampling_refusal_reaches_tool_result() {
    let client = spawn_client(
        options(full_capabilities()).consent(Arc::new(DenyAll::new("user said no"))),
    );
    client.initialize().await.expect("initialize failed");

    let result = client
        .call_tool("ask", Some(json!({"prompt": "anything"})))
        .await
        .expect("refusal must not be an error");
    assert_eq!(result.is_error, Some(true));
    assert!(result.joined_text().contains("user said no"));

    client.shutdown();
}

#[tokio::test]
async fn test_stdio_resources_and_prompts() {
    let client = spawn_and_initialize().await;

    let resources = client.list_resources().await.expect("resources/list failed");
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].uri, "mem://greeting");

    let contents = client
        .read_resource("mem://greeting")
        .await
        .expect("resources/read failed");
    match &contents[0] {
        ResourceContents::Text(text) => assert_eq!(text.text, "hello from the test server"),
        other => panic!("expected text contents, got {other:?}"),
    }

    let prompt = client
        .get_prompt(
            "greet",
            HashMap::from([("name".to_string(), "Ada".to_string())]),
        )
        .await
        .expect("prompts/get failed");
    assert_eq!(prompt.messages.len(), 1);
    assert_eq!(prompt.messages[0].content, Content::text("Say hello to Ada."));

    client.shutdown();
}

#[tokio::test]
async fn test_stdio_unknown_tool_is_invalid_params() {
    let client = spawn_and_initialize().await;

    let err = client
        .call_tool("does_not_exist", Some(json!({})))
        .await
        .expect_err("unknown tool must fail");
    match err {
        McpError::Rpc(rpc) => assert_eq!(rpc.code, INVALID_PARAMS),
        other => panic!("expected remote invalid params, got {other:?}"),
    }

    // The session survives a failed request.
    client.ping().await.expect("ping after error failed");
    client.shutdown();
}

#[tokio::test]
async fn test_stdio_ungranted_capability_fails_locally() {
    let client = spawn_client(options(CapabilitySet::new().with("tools", json!({}))));
    client.initialize().await.expect("initialize failed");

    let err = client
        .list_resources()
        .await
        .expect_err("resources were not negotiated");
    assert!(matches!(err, McpError::CapabilityNotGranted(ref cap) if cap == "resources"));

    client.shutdown();
}

#[tokio::test]
async fn test_stdio_child_exit_closes_session() {
    let client = spawn_and_initialize().await;
    client.shutdown();
    tokio::time::timeout(Duration::from_secs(5), client.closed())
        .await
        .expect("session did not close");
    assert_eq!(client.state(), NegotiationState::Closed);
    assert!(matches!(client.ping().await, Err(McpError::SessionClosed)));
}
