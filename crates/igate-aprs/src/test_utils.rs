//! Testing utilities
//!
//! [`MockIo`] implements [`crate::io::AprsIo`] in memory so the session
//! state machine and its drivers can be exercised without sockets.

use async_trait::async_trait;
use std::collections::VecDeque;

use crate::error::{AprsError, Result};
use crate::io::AprsIo;

/// In-memory [`AprsIo`] implementation for tests
#[derive(Debug, Default)]
pub struct MockIo {
    connected: bool,
    incoming: VecDeque<String>,
    written: Vec<String>,
    fail_connect: bool,
    fail_writes: bool,
}

impl MockIo {
    /// Create a mock socket
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue text to be returned by the next `read_chunk`
    pub fn push_incoming(&mut self, text: impl Into<String>) {
        self.incoming.push_back(text.into());
    }

    /// Everything written so far, CRLF stripped
    pub fn written(&self) -> Vec<String> {
        self.written.clone()
    }

    /// Make subsequent connect attempts fail
    pub fn fail_connect(&mut self, fail: bool) {
        self.fail_connect = fail;
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

#[async_trait]
impl AprsIo for MockIo {
    async fn connect(&mut self, server: &str) -> Result<()> {
        if self.fail_connect {
            return Err(AprsError::ConnectFailed {
                server: server.to_string(),
                reason: "mock refused".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_chunk(&mut self) -> Result<Option<String>> {
        if !self.connected {
            return Err(AprsError::NotConnected);
        }
        match self.incoming.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                // Behave like a quiet socket so a driver loop polling this
                // mock yields instead of spinning.
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok(None)
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        if self.fail_writes {
            self.connected = false;
            return Err(AprsError::WriteError("mock write fault".to_string()));
        }
        if !self.connected {
            return Err(AprsError::NotConnected);
        }
        self.written.push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_roundtrip() {
        let mut io = MockIo::new();
        io.connect("mock:14580").await.unwrap();
        io.push_incoming("# hello\r\n");

        assert_eq!(io.read_chunk().await.unwrap().unwrap(), "# hello\r\n");
        assert!(io.read_chunk().await.unwrap().is_none());

        io.write_line("test").await.unwrap();
        assert_eq!(io.written(), vec!["test".to_string()]);
    }
}
