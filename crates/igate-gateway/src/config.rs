//! Gateway configuration
//!
//! Everything the orchestrator needs in one serde-friendly struct: device
//! address, APRS-IS server settings, backend endpoint and the transmit
//! cadences. Durations serialize as humantime strings (`"10m"`, `"6h"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use igate_aprs::SessionConfig;

/// Default backend heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Default self-beacon interval
pub const DEFAULT_BEACON_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// Lower bound for the beacon interval
pub const BEACON_INTERVAL_MIN: Duration = Duration::from_secs(60);

/// Upper bound for the beacon interval
pub const BEACON_INTERVAL_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Default telemetry definition resend interval
pub const DEFAULT_TELEMETRY_DEFINITION_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Default telemetry data interval
pub const DEFAULT_TELEMETRY_DATA_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default width of the telemetry counter window
pub const DEFAULT_TELEMETRY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Default duplicate-position suppression window
pub const DEFAULT_POSITION_DEDUP_WINDOW: Duration = Duration::from_secs(30);

/// Default capacity of the position digest cache
pub const DEFAULT_DIGEST_CACHE_SIZE: usize = 512;

/// Default capacity of the outbound uplink queue
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 64;

/// Software name reported in APRS logins and backend heartbeats
pub const SOFTWARE_NAME: &str = "igate";

/// Gateway orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Mesh device address (host:port for TCP, device path for serial)
    #[serde(default = "default_device")]
    pub device: String,

    /// APRS-IS server (host:port)
    #[serde(default = "default_aprs_server")]
    pub aprs_server: String,

    /// Operator APRS-IS filter command, sent after login when set
    #[serde(default)]
    pub aprs_filter: Option<String>,

    /// APRS-IS keepalive comment interval
    #[serde(with = "humantime_serde", default = "default_keepalive")]
    pub aprs_keepalive: Duration,

    /// Backend base URL for heartbeat and mapping calls
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Backend API key; cleared permanently on an auth rejection
    #[serde(default)]
    pub api_key: Option<String>,

    /// Agent identifier reported in heartbeats
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Backend heartbeat interval
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Self-beacon interval, clamped to [1 minute, 24 hours]
    #[serde(with = "humantime_serde", default = "default_beacon_interval")]
    pub beacon_interval: Duration,

    /// Telemetry definition resend interval
    #[serde(with = "humantime_serde", default = "default_telemetry_definition_interval")]
    pub telemetry_definition_interval: Duration,

    /// Telemetry data line interval
    #[serde(with = "humantime_serde", default = "default_telemetry_data_interval")]
    pub telemetry_data_interval: Duration,

    /// Width of the counter window feeding telemetry data lines
    #[serde(with = "humantime_serde", default = "default_telemetry_window")]
    pub telemetry_window: Duration,

    /// Duplicate-position suppression window
    #[serde(with = "humantime_serde", default = "default_position_dedup_window")]
    pub position_dedup_window: Duration,

    /// Capacity of the position digest cache
    #[serde(default = "default_digest_cache_size")]
    pub digest_cache_size: usize,

    /// Capacity of the outbound uplink queue
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,
}

fn default_device() -> String {
    format!("127.0.0.1:{}", igate_proto::DEFAULT_DEVICE_PORT)
}

fn default_aprs_server() -> String {
    "rotate.aprs2.net:14580".to_string()
}

fn default_keepalive() -> Duration {
    igate_aprs::DEFAULT_KEEPALIVE
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8600".to_string()
}

fn default_agent() -> String {
    format!("{}/{}", SOFTWARE_NAME, env!("CARGO_PKG_VERSION"))
}

fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

fn default_beacon_interval() -> Duration {
    DEFAULT_BEACON_INTERVAL
}

fn default_telemetry_definition_interval() -> Duration {
    DEFAULT_TELEMETRY_DEFINITION_INTERVAL
}

fn default_telemetry_data_interval() -> Duration {
    DEFAULT_TELEMETRY_DATA_INTERVAL
}

fn default_telemetry_window() -> Duration {
    DEFAULT_TELEMETRY_WINDOW
}

fn default_position_dedup_window() -> Duration {
    DEFAULT_POSITION_DEDUP_WINDOW
}

fn default_digest_cache_size() -> usize {
    DEFAULT_DIGEST_CACHE_SIZE
}

fn default_outbound_queue_size() -> usize {
    DEFAULT_OUTBOUND_QUEUE_SIZE
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            aprs_server: default_aprs_server(),
            aprs_filter: None,
            aprs_keepalive: default_keepalive(),
            backend_url: default_backend_url(),
            api_key: None,
            agent: default_agent(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            beacon_interval: DEFAULT_BEACON_INTERVAL,
            telemetry_definition_interval: DEFAULT_TELEMETRY_DEFINITION_INTERVAL,
            telemetry_data_interval: DEFAULT_TELEMETRY_DATA_INTERVAL,
            telemetry_window: DEFAULT_TELEMETRY_WINDOW,
            position_dedup_window: DEFAULT_POSITION_DEDUP_WINDOW,
            digest_cache_size: DEFAULT_DIGEST_CACHE_SIZE,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
        }
    }
}

impl GatewayConfig {
    /// Beacon interval clamped to its allowed bounds
    pub fn clamped_beacon_interval(&self) -> Duration {
        self.beacon_interval
            .clamp(BEACON_INTERVAL_MIN, BEACON_INTERVAL_MAX)
    }

    /// Derive the APRS session configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            server: self.aprs_server.clone(),
            software: SOFTWARE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            filter: self.aprs_filter.clone(),
            keepalive: self.aprs_keepalive,
            ..Default::default()
        }
    }
}

/// Builder for [`GatewayConfig`]
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mesh device address
    pub fn device(mut self, address: impl Into<String>) -> Self {
        self.config.device = address.into();
        self
    }

    /// Set the APRS-IS server
    pub fn aprs_server(mut self, server: impl Into<String>) -> Self {
        self.config.aprs_server = server.into();
        self
    }

    /// Set the operator filter command
    pub fn aprs_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.aprs_filter = Some(filter.into());
        self
    }

    /// Set the backend base URL
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    /// Set the backend API key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the beacon interval (clamped to the allowed bounds)
    pub fn beacon_interval(mut self, interval: Duration) -> Self {
        self.config.beacon_interval = interval.clamp(BEACON_INTERVAL_MIN, BEACON_INTERVAL_MAX);
        self
    }

    /// Set the position dedup window
    pub fn position_dedup_window(mut self, window: Duration) -> Self {
        self.config.position_dedup_window = window;
        self
    }

    /// Build the configuration
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
