//! In-process duplex transport
//!
//! [`MemoryTransport::pair`] returns two connected endpoints. Frames sent on
//! one side arrive on the other in FIFO order and are never dropped.
//!
//! ```text
//! a.send() --> a.outbound_tx --> b.inbound_rx --> b.receive()
//! b.send() --> b.outbound_tx --> a.inbound_rx --> a.receive()
//! ```
//!
//! Closing one side drops its sender, so the peer first drains anything
//! already buffered and then observes `TransportClosed`.

use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::mcp::transport::Transport;

/// One endpoint of an in-memory transport pair.
#[derive(Debug)]
pub struct MemoryTransport {
    /// Taken (and thereby dropped) on close.
    outbound_tx: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: CancellationToken,
}

impl MemoryTransport {
    /// Create two connected endpoints.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_cli::mcp::transport::memory::MemoryTransport;
    ///
    /// let (client_side, server_side) = MemoryTransport::pair();
    /// ```
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel::<String>();
        let (b_tx, a_rx) = mpsc::unbounded_channel::<String>();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            outbound_tx: StdMutex::new(Some(tx)),
            inbound_rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    fn drop_sender(&self) {
        if let Ok(mut guard) = self.outbound_tx.lock() {
            guard.take();
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let guard = self
            .outbound_tx
            .lock()
            .map_err(|_| McpError::Transport("outbound lock poisoned".into()))?;
        let tx = guard.as_ref().ok_or(McpError::TransportClosed)?;
        tx.send(frame).map_err(|_| McpError::TransportClosed)
    }

    async fn receive(&self) -> Result<String> {
        tokio::select! {
            biased;

            _ = self.closed.cancelled() => Err(McpError::TransportClosed),

            frame = async { self.inbound_rx.lock().await.recv().await } => {
                frame.ok_or(McpError::TransportClosed)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        // Cancel first so a pending receive releases the inbound lock.
        self.closed.cancel();
        self.drop_sender();
        self.inbound_rx.lock().await.close();
        Ok(())
    }
}
