//! MCP transport layer.
//!
//! Messages are newline-delimited JSON. `StdioTransport` serves the current
//! process's stdin/stdout, `ChildProcessTransport` talks to a spawned server
//! and `ChannelTransport` connects two in-memory endpoints.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::error::McpError;

#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Read the next message line. `None` once the peer has closed.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    /// Write one message line.
    async fn send(&mut self, message: &str) -> Result<(), McpError>;
}

async fn read_message<R>(reader: &mut R) -> Result<Option<String>, McpError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
}

async fn write_message<W>(writer: &mut W, message: &str) -> Result<(), McpError>
where
    W: AsyncWrite + Unpin + Send,
{
    writer.write_all(message.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Reads from stdin, writes to stdout.
pub struct StdioTransport {
    reader: BufReader<tokio::io::Stdin>,
    writer: tokio::io::Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        read_message(&mut self.reader).await
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        write_message(&mut self.writer, message).await
    }
}

/// Stdio pipes of a spawned MCP server process.
///
/// The child is killed when the transport is dropped.
pub struct ChildProcessTransport {
    child: Child,
    reader: BufReader<ChildStdout>,
    writer: ChildStdin,
}

impl ChildProcessTransport {
    pub fn spawn(program: &str, args: &[&str]) -> Result<Self, McpError> {
        tracing::info!(program = %program, "Spawning MCP server process");

        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let writer = child.stdin.take().ok_or_else(|| {
            McpError::ServerUnavailable("Failed to capture server stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            McpError::ServerUnavailable("Failed to capture server stdout".to_string())
        })?;

        Ok(Self {
            child,
            reader: BufReader::new(stdout),
            writer,
        })
    }

    /// Kill the server process and wait for it to exit.
    pub async fn kill(&mut self) -> Result<(), McpError> {
        self.child.kill().await?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for ChildProcessTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        read_message(&mut self.reader).await
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        write_message(&mut self.writer, message).await
    }
}

/// In-memory transport backed by a channel pair.
pub struct ChannelTransport {
    rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Two connected endpoints: what one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(64);
        let (tx_b, rx_a) = mpsc::channel(64);
        (Self { rx: rx_a, tx: tx_a }, Self { rx: rx_b, tx: tx_b })
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.tx.send(message.to_string()).await.map_err(|e| {
            McpError::Transport(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }
}
