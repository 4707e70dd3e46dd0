//! Serial port transport for locally attached mesh devices
//!
//! Uses tokio-serial for async access. The byte stream is identical to the
//! TCP transport's; framing is handled upstream by the frame decoder.

use crate::error::{ProtoError, Result};
use crate::transport::{LinkState, MeshTransport};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace};

/// Default baud rate for mesh serial devices
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Read chunk size per syscall
const READ_CHUNK: usize = 512;

/// Serial transport for mesh device communication
pub struct SerialTransport {
    port_path: PathBuf,
    baud_rate: u32,
    timeout: Duration,
    stream: Option<SerialStream>,
    state: LinkState,
    name: String,
}

impl SerialTransport {
    /// Create a new serial transport for the given port path
    pub fn new(port: impl AsRef<Path>) -> Self {
        let port_path = port.as_ref().to_path_buf();
        let name = format!("serial:{}", port_path.display());
        Self {
            port_path,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(500),
            stream: None,
            state: LinkState::Disconnected,
            name,
        }
    }

    /// Override the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state
    }
}

#[async_trait]
impl MeshTransport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.state == LinkState::Connected {
            return Ok(());
        }

        self.state = LinkState::Connecting;
        info!(port = %self.port_path.display(), baud = self.baud_rate, "Opening serial port");

        if !self.port_path.exists() {
            self.state = LinkState::Disconnected;
            return Err(ProtoError::PortNotFound(
                self.port_path.display().to_string(),
            ));
        }

        let stream = tokio_serial::new(self.port_path.to_string_lossy(), self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| {
                self.state = LinkState::Disconnected;
                ProtoError::ConnectFailed {
                    target: self.port_path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;

        self.stream = Some(stream);
        self.state = LinkState::Connected;
        info!(port = %self.port_path.display(), "Serial port open");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        self.state = LinkState::Disconnected;
        info!(port = %self.port_path.display(), "Serial port closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && self.stream.is_some()
    }

    async fn read_bytes(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(ProtoError::Disconnected)?;

        let mut chunk = [0u8; READ_CHUNK];
        match stream.read(&mut chunk).await {
            Ok(0) => {
                self.state = LinkState::Disconnected;
                Err(ProtoError::Disconnected)
            }
            Ok(n) => {
                trace!(bytes = n, "Read from serial port");
                buf.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                error!(error = %e, "Serial read error");
                self.state = LinkState::Disconnected;
                Err(ProtoError::ReadError(e.to_string()))
            }
        }
    }

    async fn write_all(&mut self, packet: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(ProtoError::Disconnected)?;

        debug!(size = packet.len(), "Writing packet to serial port");
        stream.write_all(packet).await.map_err(|e| {
            error!(error = %e, "Serial write error");
            self.state = LinkState::Disconnected;
            ProtoError::WriteError(e.to_string())
        })?;
        stream
            .flush()
            .await
            .map_err(|e| ProtoError::WriteError(format!("Flush failed: {}", e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state)
            .finish()
    }
}
