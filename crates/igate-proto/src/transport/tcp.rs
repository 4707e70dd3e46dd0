//! TCP transport for mesh devices exposing a network socket
//!
//! Most network-capable devices listen on port 4403 and speak the same
//! framed stream as the serial interface.

use crate::error::{ProtoError, Result};
use crate::transport::{LinkState, MeshTransport};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace};

/// Read chunk size per syscall
const READ_CHUNK: usize = 1024;

/// Default per-read timeout; expiry just means "no data yet"
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// TCP transport for connecting to mesh devices over the network
pub struct TcpTransport {
    address: String,
    stream: Option<TcpStream>,
    state: LinkState,
    read_timeout: Duration,
}

impl TcpTransport {
    /// Create a new TCP transport
    ///
    /// # Arguments
    ///
    /// * `address` - The address to connect to (e.g., "192.168.1.100:4403")
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
            state: LinkState::Disconnected,
            read_timeout: READ_TIMEOUT,
        }
    }

    /// Override the per-read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state
    }
}

#[async_trait]
impl MeshTransport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.state == LinkState::Connected {
            return Ok(());
        }

        self.state = LinkState::Connecting;
        info!(address = %self.address, "Connecting to mesh device");

        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            self.state = LinkState::Disconnected;
            ProtoError::ConnectFailed {
                target: self.address.clone(),
                reason: e.to_string(),
            }
        })?;

        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        self.state = LinkState::Connected;

        info!(address = %self.address, "Connected to mesh device");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        self.state = LinkState::Disconnected;
        info!(address = %self.address, "Disconnected from mesh device");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && self.stream.is_some()
    }

    async fn read_bytes(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(ProtoError::Disconnected)?;

        let mut chunk = [0u8; READ_CHUNK];
        match tokio::time::timeout(self.read_timeout, stream.read(&mut chunk)).await {
            Err(_) => Ok(0), // no data before timeout
            Ok(Ok(0)) => {
                self.state = LinkState::Disconnected;
                Err(ProtoError::Disconnected)
            }
            Ok(Ok(n)) => {
                trace!(bytes = n, "Read from mesh socket");
                buf.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Mesh socket read error");
                self.state = LinkState::Disconnected;
                Err(ProtoError::ReadError(e.to_string()))
            }
        }
    }

    async fn write_all(&mut self, packet: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(ProtoError::Disconnected)?;

        debug!(size = packet.len(), "Writing packet to mesh socket");
        stream.write_all(packet).await.map_err(|e| {
            error!(error = %e, "Mesh socket write error");
            self.state = LinkState::Disconnected;
            ProtoError::WriteError(e.to_string())
        })?;
        stream
            .flush()
            .await
            .map_err(|e| ProtoError::WriteError(format!("Flush failed: {}", e)))
    }

    fn name(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn starts_disconnected() {
        let t = TcpTransport::new("127.0.0.1:4403");
        assert_eq!(t.state(), LinkState::Disconnected);
        assert!(!t.is_connected());
    }

    #[tokio::test]
    async fn read_write_through_local_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&buf[..n]).await.unwrap();
        });

        let mut t = TcpTransport::new(addr.to_string());
        t.connect().await.unwrap();
        assert!(t.is_connected());

        t.write_all(b"ping").await.unwrap();

        let mut received = Vec::new();
        while received.len() < 4 {
            t.read_bytes(&mut received).await.unwrap();
        }
        assert_eq!(&received, b"ping");

        t.disconnect().await.unwrap();
        assert!(!t.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        // Port 1 is essentially never listening.
        let mut t = TcpTransport::new("127.0.0.1:1");
        let err = t.connect().await.unwrap_err();
        assert!(err.is_retriable());
        assert!(!t.is_connected());
    }
}
