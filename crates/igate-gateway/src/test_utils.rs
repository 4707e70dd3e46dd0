//! Testing doubles for the orchestrator
//!
//! [`MockTransport`] stands in for the mesh device link and [`MockBackend`]
//! for the provisioning REST service. Both hand out cloneable handles so a
//! test can keep feeding input or inspecting calls after the gateway has
//! taken ownership.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use igate_proto::{MeshTransport, ProtoError};

use crate::backend::{BackendError, HeartbeatResponse, MappingsResponse, ProvisioningBackend};

/// In-memory mesh transport for tests
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: bool,
    fail_connect: bool,
    incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

/// Cloneable handle for driving a [`MockTransport`] after the gateway owns it
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    /// Create a disconnected mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connect attempts fail
    pub fn fail_connect(&mut self, fail: bool) {
        self.fail_connect = fail;
    }

    /// Handle for feeding bytes and reading writes from outside
    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            incoming: Arc::clone(&self.incoming),
            written: Arc::clone(&self.written),
        }
    }
}

impl MockTransportHandle {
    /// Queue bytes to be returned by the next read
    pub fn feed(&self, bytes: Vec<u8>) {
        self.incoming.lock().push_back(bytes);
    }

    /// Every packet the gateway wrote to the device
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl MeshTransport for MockTransport {
    async fn connect(&mut self) -> igate_proto::Result<()> {
        if self.fail_connect {
            return Err(ProtoError::ConnectFailed {
                target: "mock".to_string(),
                reason: "mock refused".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> igate_proto::Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_bytes(&mut self, buf: &mut Vec<u8>) -> igate_proto::Result<usize> {
        if !self.connected {
            return Err(ProtoError::Disconnected);
        }
        match self.incoming.lock().pop_front() {
            Some(bytes) => {
                let n = bytes.len();
                buf.extend_from_slice(&bytes);
                Ok(n)
            }
            None => {
                // Behave like a quiet socket so a driver loop polling this
                // mock yields instead of spinning.
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(0)
            }
        }
    }

    async fn write_all(&mut self, packet: &[u8]) -> igate_proto::Result<()> {
        if !self.connected {
            return Err(ProtoError::Disconnected);
        }
        self.written.lock().push(packet.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

type HeartbeatScript = VecDeque<Result<HeartbeatResponse, BackendError>>;
type MappingsScript = VecDeque<Result<MappingsResponse, BackendError>>;

#[derive(Debug, Default)]
struct MockBackendState {
    heartbeats: HeartbeatScript,
    mappings: MappingsScript,
    heartbeat_calls: u64,
    mapping_calls: u64,
}

/// Scripted [`ProvisioningBackend`] for tests.
///
/// Responses queue in FIFO order; with the queue empty, heartbeats answer an
/// all-quiet default and mapping fetches an empty table.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockBackendState>>,
}

impl MockBackend {
    /// Create a backend that answers defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a heartbeat response
    pub fn push_heartbeat(&self, response: Result<HeartbeatResponse, BackendError>) {
        self.state.lock().heartbeats.push_back(response);
    }

    /// Queue a mapping fetch response
    pub fn push_mappings(&self, response: Result<MappingsResponse, BackendError>) {
        self.state.lock().mappings.push_back(response);
    }

    /// Number of heartbeat calls received
    pub fn heartbeat_calls(&self) -> u64 {
        self.state.lock().heartbeat_calls
    }

    /// Number of mapping fetch calls received
    pub fn mapping_calls(&self) -> u64 {
        self.state.lock().mapping_calls
    }
}

#[async_trait]
impl ProvisioningBackend for MockBackend {
    async fn heartbeat(
        &self,
        _local_hash: Option<&str>,
        _agent: &str,
    ) -> Result<HeartbeatResponse, BackendError> {
        let mut state = self.state.lock();
        state.heartbeat_calls += 1;
        state
            .heartbeats
            .pop_front()
            .unwrap_or_else(|| Ok(HeartbeatResponse::default()))
    }

    async fn fetch_mappings(
        &self,
        _known_hash: Option<&str>,
    ) -> Result<MappingsResponse, BackendError> {
        let mut state = self.state.lock();
        state.mapping_calls += 1;
        state.mappings.pop_front().unwrap_or_else(|| {
            Ok(MappingsResponse {
                hash: "empty".to_string(),
                items: Vec::new(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_feed_and_read() {
        let mut transport = MockTransport::new();
        let handle = transport.handle();
        transport.connect().await.unwrap();

        handle.feed(vec![1, 2, 3]);
        let mut buf = Vec::new();
        assert_eq!(transport.read_bytes(&mut buf).await.unwrap(), 3);
        assert_eq!(buf, vec![1, 2, 3]);

        transport.write_all(&[9]).await.unwrap();
        assert_eq!(handle.written(), vec![vec![9]]);
    }

    #[tokio::test]
    async fn backend_scripts_in_order() {
        let backend = MockBackend::new();
        backend.push_heartbeat(Err(BackendError::Auth));

        assert!(matches!(
            backend.heartbeat(None, "test").await,
            Err(BackendError::Auth)
        ));
        // Script exhausted: defaults take over
        assert!(backend.heartbeat(None, "test").await.is_ok());
        assert_eq!(backend.heartbeat_calls(), 2);
    }
}
