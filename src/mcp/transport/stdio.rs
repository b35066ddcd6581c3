//! Stdio transport: newline-delimited JSON over a pair of byte streams
//!
//! [`StdioTransport`] frames messages one JSON object per line. It can drive
//! a child process ([`StdioTransport::spawn`]), serve over the current
//! process's own stdin/stdout ([`StdioTransport::from_stdio`]), or wrap any
//! `AsyncRead`/`AsyncWrite` pair ([`StdioTransport::from_io`]).
//!
//! # Protocol
//!
//! - Outbound frames are written followed by a newline (`\n`).
//! - Inbound lines are decoded with [`LinesCodec`] capped at a maximum
//!   length; oversized lines are logged and skipped, blank lines ignored.
//! - A child's stderr is logged via `tracing::debug!`. It is diagnostic
//!   output and never treated as an error.
//!
//! # Lifecycle
//!
//! Two background Tokio tasks are started on construction: one writes queued
//! frames, one reads lines. When a child-backed transport is dropped, a
//! best-effort SIGTERM (Unix) or `start_kill` (non-Unix) is sent to the
//! child process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::mcp::transport::Transport;

/// Largest inbound line accepted before it is discarded.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Newline-delimited JSON transport over a byte-stream pair.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcp_cli::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(
///     "/usr/local/bin/my-mcp-server".into(),
///     vec!["--verbose".into()],
///     HashMap::new(),
///     None,
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Queue drained by the writer task; taken on close.
    outbound_tx: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    /// Lines produced by the reader task.
    inbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: CancellationToken,
    /// Present only for child-process transports; used by `Drop`.
    child: Option<StdMutex<Child>>,
}

impl StdioTransport {
    /// Wrap an arbitrary reader/writer pair.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::from_io_with_limit(reader, writer, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Like [`StdioTransport::from_io`] with an explicit inbound line limit.
    pub fn from_io_with_limit<R, W>(reader: R, writer: W, max_frame_bytes: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let closed = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(write_frames(writer, outbound_rx));
        tokio::spawn(read_frames(
            reader,
            inbound_tx,
            max_frame_bytes,
            closed.clone(),
        ));

        Self {
            outbound_tx: StdMutex::new(Some(outbound_tx)),
            inbound_rx: Mutex::new(inbound_rx),
            closed,
            child: None,
        }
    }

    /// Serve over the current process's stdin and stdout.
    pub fn from_stdio() -> Self {
        Self::from_io(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Spawn a child process and wire up its stdio pipes.
    ///
    /// The child's environment is cleared and replaced by `env`. If
    /// `working_dir` is `Some`, the child runs there.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] if the process cannot be spawned or
    /// if its stdio pipes are unavailable.
    pub fn spawn(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut cmd = Command::new(&executable);
        cmd.args(&args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env_clear().envs(&env);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::Transport(format!(
                "failed to spawn MCP server `{}`: {}",
                executable.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Transport("child stderr unavailable after spawn".into()))?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(
                    target: "mcp_cli::mcp::transport::stdio",
                    "mcp server stderr: {}",
                    line
                );
            }
        });

        tracing::debug!(
            executable = %executable.display(),
            pid = child.id(),
            "spawned MCP server"
        );

        let mut transport = Self::from_io(stdout, stdin);
        transport.child = Some(StdMutex::new(child));
        Ok(transport)
    }

    fn drop_sender(&self) {
        if let Ok(mut guard) = self.outbound_tx.lock() {
            guard.take();
        }
    }
}

async fn write_frames<W>(writer: W, mut outbound_rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            tracing::debug!("stdio transport write failed: {e}");
            return;
        }
    }
    // Sender dropped: flush and close so the peer sees EOF.
    if let Err(e) = SinkExt::<String>::close(&mut sink).await {
        tracing::debug!("stdio transport close failed: {e}");
    }
}

/// Line decoder that drops oversized lines and keeps going.
///
/// [`LinesCodec`] reports an oversized line as an error, which would put
/// the surrounding `FramedRead` into its error state and leave frames
/// already buffered behind the bad line undelivered until more bytes
/// arrive. Here the error never leaves the decoder: the codec switches to
/// discarding the rest of the line and decoding resumes on the same buffer.
#[derive(Debug)]
struct FrameDecoder {
    lines: LinesCodec,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    fn new(max_frame_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame_bytes),
            max_frame_bytes,
        }
    }

    fn skip_oversized(&self) {
        tracing::warn!(
            max_frame_bytes = self.max_frame_bytes,
            "stdio transport: inbound frame exceeds maximum length; skipping"
        );
    }
}

impl Decoder for FrameDecoder {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<String>, Self::Error> {
        loop {
            match self.lines.decode(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.skip_oversized(),
                other => return other,
            }
        }
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<String>, Self::Error> {
        loop {
            match self.lines.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.skip_oversized(),
                other => return other,
            }
        }
    }
}

async fn read_frames<R>(
    reader: R,
    inbound_tx: mpsc::UnboundedSender<String>,
    max_frame_bytes: usize,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = FramedRead::new(reader, FrameDecoder::new(max_frame_bytes));
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => return,
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if inbound_tx.send(line).is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::debug!("stdio transport read failed: {e}");
                return;
            }
            None => return,
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let guard = self
            .outbound_tx
            .lock()
            .map_err(|_| McpError::Transport("outbound lock poisoned".into()))?;
        let tx = guard.as_ref().ok_or(McpError::TransportClosed)?;
        tx.send(frame)
            .map_err(|_| McpError::Transport("stdio writer has exited".into()))
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
        self.closed.cancel();
        self.drop_sender();
        Ok(())
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of the child process on drop.
    ///
    /// On Unix, sends SIGTERM to the child PID via `libc::kill`. On
    /// non-Unix platforms, calls `start_kill()` on the child handle. Never
    /// blocks.
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        let Ok(child) = child.get_mut() else {
            return;
        };
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    }
}
