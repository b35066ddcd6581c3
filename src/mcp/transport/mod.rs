//! Transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every duplex channel
//! carrying MCP frames must satisfy. Concrete implementations live in
//! submodules:
//!
//! - [`memory::MemoryTransport`] -- in-process pair connected by channels,
//!   used by the demo command and by tests.
//! - [`stdio::StdioTransport`] -- newline-delimited JSON over a child
//!   process's stdin/stdout, or over the current process's own stdio.
//!
//! # Design
//!
//! The trait is intentionally minimal: callers `send` one serialized
//! JSON-RPC frame and `receive` one frame at a time. Framing is the
//! responsibility of each implementation. A session is the only reader and
//! the only writer of its transport, so implementations need not support
//! concurrent receivers.

use crate::error::Result;

/// Abstraction over a reliable, ordered duplex byte channel carrying frames.
///
/// # Examples
///
/// ```
/// use mcp_cli::mcp::transport::{memory::MemoryTransport, Transport};
///
/// # #[tokio::main]
/// # async fn main() -> mcp_cli::error::Result<()> {
/// let (a, b) = MemoryTransport::pair();
/// a.send(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string()).await?;
/// assert!(b.receive().await?.contains("ping"));
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one complete frame to the peer.
    ///
    /// The frame MUST be a single JSON object without a trailing newline;
    /// the transport adds whatever framing the medium needs.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpError::TransportClosed`] when this side
    /// has been closed or the peer has gone away, and
    /// [`crate::error::McpError::Transport`] for other I/O failures.
    async fn send(&self, frame: String) -> Result<()>;

    /// Wait for the next complete inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpError::TransportClosed`] once the channel
    /// is closed and every buffered frame has been delivered.
    async fn receive(&self) -> Result<String>;

    /// Close this side. Idempotent.
    async fn close(&self) -> Result<()>;
}

pub mod memory;
pub mod stdio;
