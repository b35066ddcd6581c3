//! Session integration tests
//!
//! Exercises correlation, nesting, cancellation and shutdown of two
//! [`Session`]s joined by a [`MemoryTransport`] pair.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};

use mcp_cli::error::{McpError, Result};
use mcp_cli::mcp::codec::{self, Message};
use mcp_cli::mcp::session::{
    BoxFuture, InboundRequest, RequestOptions, Session, SessionConfig,
};
use mcp_cli::mcp::telemetry::{EventKind, MemorySink};
use mcp_cli::mcp::transport::memory::MemoryTransport;
use mcp_cli::mcp::transport::Transport;
use mcp_cli::mcp::types::METHOD_CANCEL_REQUEST;

/// Answers `{"i": n}` after sleeping `(10 - n) * 10ms`, so later requests
/// finish first.
fn delayed_echo(req: InboundRequest) -> BoxFuture<'static, Result<Value>> {
    Box::pin(async move {
        let i = req
            .params
            .as_ref()
            .and_then(|p| p.get("i"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(10 * (10 - i.min(10)))).await;
        Ok(json!({ "i": i }))
    })
}

async fn next_message(peer: &MemoryTransport) -> Message {
    let frame = tokio::time::timeout(Duration::from_secs(2), peer.receive())
        .await
        .expect("timed out waiting for frame")
        .expect("transport closed");
    codec::decode(&frame).expect("undecodable frame")
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated_in_reverse_completion_order() {
    let (a, b) = MemoryTransport::pair();
    let client = Session::new(a, SessionConfig::labelled("client"));
    let _server = Session::builder(b)
        .config(SessionConfig::labelled("server"))
        .request_handler(delayed_echo)
        .start();

    let calls = (0..10u64).map(|i| {
        let client = client.clone();
        async move { (i, client.request("echo", Some(json!({ "i": i }))).await) }
    });

    for (i, result) in join_all(calls).await {
        assert_eq!(result.unwrap(), json!({ "i": i }));
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_nested_request_from_handler_does_not_deadlock() {
    let (a, b) = MemoryTransport::pair();

    // The client answers `inner` after a short pause.
    let client = Session::builder(a)
        .config(SessionConfig::labelled("client"))
        .request_handler(|req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({ "inner": req.method }))
            })
        })
        .start();

    // The server's `outer` handler calls back into the client before replying.
    let (_server, ()) = Session::builder(b)
        .config(SessionConfig::labelled("server"))
        .start_with(|session| {
            let handle = session.clone();
            session.serve_requests(
                move |req: InboundRequest| -> BoxFuture<'static, Result<Value>> {
                    let handle = handle.clone();
                    Box::pin(async move {
                        if req.method == "outer" {
                            let inner = handle.request("inner", None).await?;
                            Ok(json!({ "outer": inner }))
                        } else {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(json!({ "other": req.method }))
                        }
                    })
                },
            );
        });

    let (outer, other) = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(client.request("outer", None), client.request("slow", None))
    })
    .await
    .expect("nested request deadlocked");

    assert_eq!(outer.unwrap(), json!({ "outer": { "inner": "inner" } }));
    assert_eq!(other.unwrap(), json!({ "other": "slow" }));
}

#[tokio::test]
async fn test_transport_close_fails_every_pending_request() {
    let (ours, peer) = MemoryTransport::pair();
    let session = Session::new(ours, SessionConfig::labelled("client"));

    let pending: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|m| session.send_request(m, None).unwrap())
        .collect();
    assert_eq!(session.pending_count(), 3);

    peer.close().await.unwrap();

    for request in pending {
        assert!(matches!(
            request.response().await,
            Err(McpError::SessionClosed)
        ));
    }
    assert_eq!(session.pending_count(), 0);
    tokio::time::timeout(Duration::from_secs(1), session.closed())
        .await
        .expect("session should close with its transport");
}

#[tokio::test]
async fn test_cancel_resolves_caller_and_notifies_peer() {
    let (ours, peer) = MemoryTransport::pair();
    let sink = Arc::new(MemorySink::new());
    let config = SessionConfig {
        events: sink.clone(),
        ..SessionConfig::labelled("client")
    };
    let session = Session::new(ours, config);

    let pending = session.send_request("tools/call", None).unwrap();
    let id = pending.id().clone();
    let canceller = pending.canceller();
    let Message::Request(sent) = next_message(&peer).await else {
        panic!("expected the request first");
    };
    assert_eq!(sent.id, id);

    assert!(canceller.cancel());
    assert!(!canceller.cancel());
    assert!(matches!(pending.response().await, Err(McpError::Cancelled)));
    assert_eq!(session.pending_count(), 0);

    let Message::Notification(notice) = next_message(&peer).await else {
        panic!("expected a cancel notification");
    };
    assert_eq!(notice.method, METHOD_CANCEL_REQUEST);
    assert_eq!(notice.params, Some(json!({ "id": id.to_value() })));

    // A late response for the cancelled id is dropped without effect.
    peer.send(codec::encode(&Message::response(id, json!({}))))
        .await
        .unwrap();
    let unanswered = session
        .request_with(
            "ping",
            None,
            RequestOptions {
                timeout: Some(Duration::from_millis(20)),
            },
        )
        .await;
    assert!(matches!(unanswered, Err(McpError::Timeout { .. })));
    assert!(!session.is_closed());
    assert!(sink
        .events()
        .iter()
        .any(|recorded| matches!(recorded.event.kind, EventKind::Request { .. })));
}

#[tokio::test]
async fn test_timeout_surfaces_after_cleanup() {
    let (ours, _peer) = MemoryTransport::pair();
    let mut config = SessionConfig::labelled("client");
    config.default_timeout = Some(Duration::from_millis(30));
    let session = Session::new(ours, config);

    let err = session.request("slow/method", None).await.unwrap_err();
    match err {
        McpError::Timeout { method, after_ms } => {
            assert_eq!(method, "slow/method");
            assert_eq!(after_ms, 30);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(session.pending_count(), 0);
    assert!(!session.is_closed());
}
