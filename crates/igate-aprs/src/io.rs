//! APRS-IS socket transport
//!
//! [`AprsIo`] abstracts the line-oriented socket so the session state
//! machine can be driven by a mock in tests; [`TcpLineIo`] is the real
//! TCP implementation.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{AprsError, Result};

/// Read chunk size per syscall
const READ_CHUNK: usize = 1024;

/// Default per-read timeout; expiry just means "no data yet"
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Trait for APRS-IS socket implementations
#[async_trait]
pub trait AprsIo: Send {
    /// Open a connection to `server` (host:port)
    async fn connect(&mut self, server: &str) -> Result<()>;

    /// Close the connection, ignoring errors
    async fn disconnect(&mut self);

    /// Whether a connection is currently open
    fn is_connected(&self) -> bool;

    /// Read whatever text arrived, or `None` when no data was available
    /// before the read timeout. Line splitting is the caller's concern.
    async fn read_chunk(&mut self) -> Result<Option<String>>;

    /// Write one line; the CRLF terminator is appended here
    async fn write_line(&mut self, line: &str) -> Result<()>;
}

/// TCP implementation of [`AprsIo`]
#[derive(Debug)]
pub struct TcpLineIo {
    stream: Option<TcpStream>,
    read_timeout: Duration,
}

impl TcpLineIo {
    /// Create a disconnected transport
    pub fn new() -> Self {
        Self {
            stream: None,
            read_timeout: READ_TIMEOUT,
        }
    }
}

impl Default for TcpLineIo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AprsIo for TcpLineIo {
    async fn connect(&mut self, server: &str) -> Result<()> {
        let stream = TcpStream::connect(server)
            .await
            .map_err(|e| AprsError::ConnectFailed {
                server: server.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true).ok();
        debug!(server, "Connected to APRS-IS");
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn read_chunk(&mut self) -> Result<Option<String>> {
        let stream = self.stream.as_mut().ok_or(AprsError::NotConnected)?;

        let mut buf = [0u8; READ_CHUNK];
        match tokio::time::timeout(self.read_timeout, stream.read(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => {
                self.stream = None;
                Err(AprsError::ConnectionClosed)
            }
            Ok(Ok(n)) => {
                trace!(bytes = n, "Read from APRS-IS");
                Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
            }
            Ok(Err(e)) => {
                self.stream = None;
                Err(AprsError::ReadError(e.to_string()))
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(AprsError::NotConnected)?;

        trace!(line, "Writing to APRS-IS");
        let mut data = line.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        stream.write_all(&data).await.map_err(|e| {
            self.stream = None;
            AprsError::WriteError(e.to_string())
        })
    }
}
