//! Backend REST client
//!
//! The provisioning backend is consumed through [`ProvisioningBackend`], a
//! narrow trait the orchestrator drives and tests mock. The HTTP shape is a
//! thin JSON POST pair: heartbeat and mapping fetch, authenticated with a
//! static API key header. A 401 is terminal for the credential; every other
//! failure is transient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::provision::{MappingEntry, ProvisioningRecord};

/// Header carrying the API key
const API_KEY_HEADER: &str = "x-api-key";

/// Request timeout for backend calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Backend call failures
#[derive(Error, Debug)]
pub enum BackendError {
    /// Credential rejected; terminal, the stored key must be cleared
    #[error("Backend rejected the API key")]
    Auth,

    /// Anything else: network fault, timeout, 5xx, bad body
    #[error("Backend unavailable: {0}")]
    Transient(String),
}

/// Result type alias for backend calls
pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    local_hash: Option<&'a str>,
    agent: &'a str,
}

/// Heartbeat response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatResponse {
    /// The server's mapping hash differs from `local_hash`
    #[serde(default)]
    pub needs_update: bool,
    /// Server-side mapping table hash
    #[serde(default)]
    pub hash: Option<String>,
    /// Server wall clock, informational
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
    /// New provisioning to apply, when the backend pushed one
    #[serde(default)]
    pub provision: Option<ProvisioningRecord>,
}

#[derive(Debug, Serialize)]
struct MappingsRequest<'a> {
    known_hash: Option<&'a str>,
}

/// Mapping fetch response body
#[derive(Debug, Clone, Deserialize)]
pub struct MappingsResponse {
    /// Hash identifying this table version
    pub hash: String,
    /// The full mapping table; replaces the local copy wholesale
    pub items: Vec<MappingEntry>,
}

/// Trait seam between the orchestrator and the backend REST calls
#[async_trait]
pub trait ProvisioningBackend: Send {
    /// Post a heartbeat carrying the locally cached mapping hash
    async fn heartbeat(&self, local_hash: Option<&str>, agent: &str) -> Result<HeartbeatResponse>;

    /// Fetch the full mapping table
    async fn fetch_mappings(&self, known_hash: Option<&str>) -> Result<MappingsResponse>;
}

/// HTTP implementation of [`ProvisioningBackend`]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpBackend {
    /// Create a client for `base_url` authenticating with `api_key`
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackendError::Auth);
        }
        if !status.is_success() {
            return Err(BackendError::Transient(format!("{} returned {}", url, status)));
        }

        debug!(url, status = %status, "Backend call succeeded");
        response
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("bad response body: {}", e)))
    }
}

#[async_trait]
impl ProvisioningBackend for HttpBackend {
    async fn heartbeat(&self, local_hash: Option<&str>, agent: &str) -> Result<HeartbeatResponse> {
        self.post("/api/heartbeat", &HeartbeatRequest { local_hash, agent })
            .await
    }

    async fn fetch_mappings(&self, known_hash: Option<&str>) -> Result<MappingsResponse> {
        self.post("/api/mappings", &MappingsRequest { known_hash })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_response_tolerates_sparse_body() {
        let resp: HeartbeatResponse = serde_json::from_str("{}").unwrap();
        assert!(!resp.needs_update);
        assert!(resp.provision.is_none());

        let resp: HeartbeatResponse = serde_json::from_str(
            r#"{"needs_update": true, "hash": "abc", "provision": {"callsign": "N0CALL"}}"#,
        )
        .unwrap();
        assert!(resp.needs_update);
        assert_eq!(resp.provision.unwrap().callsign, "N0CALL");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = HttpBackend::new("http://backend.example/", "key");
        assert_eq!(backend.base_url, "http://backend.example");
    }
}
