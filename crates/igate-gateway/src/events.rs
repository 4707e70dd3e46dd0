//! Gateway event surface
//!
//! External observers (dashboard, CLI, logs) subscribe to a broadcast
//! channel of [`GatewayEvent`]s. Sends are fire-and-forget: a lagging or
//! absent subscriber never blocks the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryCounts;
use igate_mesh::{MeshSummary, NodeRecord};

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Informational
    Info,
    /// Something degraded but recoverable
    Warning,
    /// Something terminal for a subsystem
    Error,
}

/// Combined connection/backend status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether the mesh device link is up
    pub device_connected: bool,
    /// APRS-IS session state name
    pub aprs_state: String,
    /// Server name the APRS-IS peer reported, once known
    pub aprs_server: Option<String>,
    /// Whether the backend credential has been verified
    pub backend_verified: bool,
    /// Whether the last backend call failed transiently
    pub backend_degraded: bool,
}

/// One uplink line sent to APRS-IS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AprsUplink {
    /// The full transmitted line
    pub line: String,
    /// Flow id of the mesh summary that triggered it, when there is one
    pub flow_id: Option<String>,
}

/// Aggregate gateway state for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Whether the mesh device link is up
    pub device_connected: bool,
    /// APRS-IS session state name
    pub aprs_state: String,
    /// The station's derived APRS callsign, once provisioned
    pub aprs_callsign: Option<String>,
    /// Server name the APRS-IS peer reported
    pub aprs_server: Option<String>,
    /// Whether the backend credential has been verified
    pub backend_verified: bool,
    /// Whether the last backend call failed transiently
    pub backend_degraded: bool,
    /// When the backend last answered a heartbeat
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// When the self beacon last went out
    pub last_beacon: Option<DateTime<Utc>>,
    /// Known mesh nodes
    pub node_count: usize,
    /// Tracked relay link statistics entries
    pub link_stat_count: usize,
    /// Active mapping entries
    pub mapping_count: usize,
    /// Uplink lines waiting in the outbound queue
    pub queue_depth: usize,
    /// Packets suppressed by the backlog filter
    pub backlog_dropped: u64,
    /// Windowed telemetry counters
    pub telemetry: TelemetryCounts,
}

/// Notifications the gateway fans out to observers
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Device/APRS/backend status changed
    ConnectionStatus(ConnectionStatus),
    /// Operator-facing log line
    Log {
        /// Severity
        level: LogLevel,
        /// Message text
        message: String,
    },
    /// One interpreted mesh packet
    MeshSummary(Box<MeshSummary>),
    /// One line transmitted to APRS-IS
    AprsUplink(AprsUplink),
    /// Windowed telemetry counters changed
    TelemetryUpdate(TelemetryCounts),
    /// A node identity record was created or updated
    NodeUpdate(Box<NodeRecord>),
    /// Aggregate state snapshot
    StateSnapshot(Box<StateSnapshot>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes() {
        let snapshot = StateSnapshot {
            device_connected: true,
            aprs_state: "verified".to_string(),
            aprs_callsign: Some("N0CALL-10".to_string()),
            aprs_server: Some("T2TAIWAN".to_string()),
            backend_verified: true,
            backend_degraded: false,
            last_heartbeat: None,
            last_beacon: None,
            node_count: 3,
            link_stat_count: 2,
            mapping_count: 1,
            queue_depth: 0,
            backlog_dropped: 0,
            telemetry: TelemetryCounts::default(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["aprs_state"], "verified");
        assert_eq!(json["node_count"], 3);
    }
}
