//! Decoded mesh event model
//!
//! A [`MeshSummary`] is one fully interpreted mesh packet: link metrics, hop
//! accounting, resolved node references and a typed payload. Summaries are
//! what the orchestrator consumes; everything here serializes so snapshots
//! and event streams can carry it verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::registry::NodeId;
use igate_proto::proto::PortNum;

/// Coarse payload classification derived from the application port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// Text message
    Text,
    /// Position report
    Position,
    /// Node identity broadcast
    NodeInfo,
    /// Routing control
    Routing,
    /// Administrative message
    Admin,
    /// Telemetry metrics
    Telemetry,
    /// Route tracing
    Traceroute,
    /// Neighbor table broadcast
    NeighborInfo,
    /// Shared waypoint
    Waypoint,
    /// Anything else, kept with its raw port number
    Other(i32),
}

impl PortKind {
    /// Classify a raw port number
    pub fn from_port(port: i32) -> Self {
        match PortNum::try_from(port) {
            Ok(PortNum::TextMessageApp) => PortKind::Text,
            Ok(PortNum::PositionApp) => PortKind::Position,
            Ok(PortNum::NodeinfoApp) => PortKind::NodeInfo,
            Ok(PortNum::RoutingApp) => PortKind::Routing,
            Ok(PortNum::AdminApp) => PortKind::Admin,
            Ok(PortNum::TelemetryApp) => PortKind::Telemetry,
            Ok(PortNum::TracerouteApp) => PortKind::Traceroute,
            Ok(PortNum::NeighborinfoApp) => PortKind::NeighborInfo,
            Ok(PortNum::WaypointApp) => PortKind::Waypoint,
            _ => PortKind::Other(port),
        }
    }

    /// Which telemetry counter this kind of traffic ticks
    pub fn counter_class(&self) -> CounterClass {
        match self {
            PortKind::Position => CounterClass::Position,
            PortKind::Text => CounterClass::Message,
            _ => CounterClass::Control,
        }
    }
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortKind::Text => write!(f, "text"),
            PortKind::Position => write!(f, "position"),
            PortKind::NodeInfo => write!(f, "nodeinfo"),
            PortKind::Routing => write!(f, "routing"),
            PortKind::Admin => write!(f, "admin"),
            PortKind::Telemetry => write!(f, "telemetry"),
            PortKind::Traceroute => write!(f, "traceroute"),
            PortKind::NeighborInfo => write!(f, "neighborinfo"),
            PortKind::Waypoint => write!(f, "waypoint"),
            PortKind::Other(port) => write!(f, "port {}", port),
        }
    }
}

/// Counter bucket a packet contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterClass {
    /// Position reports
    Position,
    /// Text messages
    Message,
    /// Routing/admin/telemetry and other control traffic
    Control,
}

/// A reference to a node, resolved to a display label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node number
    pub id: NodeId,
    /// Display label at the time of interpretation
    pub label: String,
}

/// A reference to a relaying node, possibly inferred
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRef {
    /// Resolved node number (may be a bare tail byte when forced)
    pub id: NodeId,
    /// Display label at the time of interpretation
    pub label: String,
    /// True when the identity was inferred rather than reported verbatim
    pub guessed: bool,
    /// Human-readable inference note, present for guessed relays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Decoded position payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Latitude, degrees
    pub latitude: f64,
    /// Longitude, degrees
    pub longitude: f64,
    /// Altitude above MSL, meters
    pub altitude: Option<i32>,
    /// Course over ground, degrees
    pub course: Option<f64>,
    /// Ground speed, m/s
    pub speed_mps: Option<f64>,
    /// Satellites used for the fix
    pub sats: Option<u32>,
}

/// Decoded telemetry payload: metric family plus a flat metric map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    /// Metric family name (`device`, `environment`, `power`, `unknown`)
    pub kind: String,
    /// Flattened metric values keyed by field name
    pub metrics: BTreeMap<String, f64>,
}

/// Decoded text message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextReport {
    /// Message body
    pub body: String,
    /// Channel index the message arrived on
    pub channel: u32,
}

/// Decoded traceroute payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteReport {
    /// Hops towards the destination, labels with per-hop SNR where known
    pub towards: Vec<String>,
    /// Hops on the return route
    pub back: Vec<String>,
}

/// Decoded neighbor-table payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborReport {
    /// Directly heard neighbors with their SNR
    pub neighbors: Vec<(String, f32)>,
}

/// Decoded waypoint payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointReport {
    /// Waypoint name
    pub name: String,
    /// Latitude, degrees
    pub latitude: Option<f64>,
    /// Longitude, degrees
    pub longitude: Option<f64>,
}

/// Best-effort dump of a payload the gateway has no decoder for.
///
/// Diagnostic only: every representation is attempted so operators can
/// recognize the content of unsupported ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReport {
    /// Raw port number
    pub port: i32,
    /// Payload as lowercase hex
    pub hex: String,
    /// Payload as standard base64
    pub base64: String,
    /// Payload as text, when every byte is printable
    pub ascii: Option<String>,
    /// Payload reinterpreted as little-endian f32 values, when the length
    /// divides evenly and the values look sane
    pub floats: Vec<f32>,
}

/// Typed payload of a mesh summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SummaryPayload {
    /// Position report
    Position(PositionReport),
    /// Telemetry metrics
    Telemetry(TelemetryReport),
    /// Text message
    Text(TextReport),
    /// Traceroute result
    Route(RouteReport),
    /// Neighbor table
    Neighbors(NeighborReport),
    /// Shared waypoint
    Waypoint(WaypointReport),
    /// Undecoded payload dump
    Raw(RawReport),
    /// No payload (control traffic, identity updates)
    None,
}

/// One fully interpreted mesh packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSummary {
    /// When the packet was interpreted
    pub timestamp: DateTime<Utc>,
    /// Channel index
    pub channel: u32,
    /// SNR of the reception, dB
    pub snr: Option<f32>,
    /// RSSI of the reception, dBm
    pub rssi: Option<i32>,
    /// Hop limit the sender started with
    pub hop_start: Option<u32>,
    /// Remaining hop limit on arrival
    pub hop_limit: Option<u32>,
    /// Hops actually used: `max(hop_start - hop_limit, 0)` when both known
    pub used_hops: Option<u32>,
    /// Payload classification
    pub port: PortKind,
    /// One-line human-readable description
    pub detail: String,
    /// Sending node
    pub from: NodeRef,
    /// Destination node
    pub to: NodeRef,
    /// Last relaying node, when the packet was relayed
    pub relay: Option<RelayRef>,
    /// Planned next hop, when reported
    pub next_hop: Option<RelayRef>,
    /// Typed payload
    pub payload: SummaryPayload,
    /// Packet id assigned by the sender (0 when unassigned)
    pub packet_id: u32,
    /// Synthetic id correlating an uplink back to its trigger
    pub flow_id: String,
}

impl MeshSummary {
    /// Whether the relay identity was inferred rather than reported
    pub fn relay_guessed(&self) -> bool {
        self.relay.as_ref().is_some_and(|r| r.guessed)
    }
}

/// Compute `used_hops` from the hop accounting fields
pub fn used_hops(hop_start: Option<u32>, hop_limit: Option<u32>) -> Option<u32> {
    match (hop_start, hop_limit) {
        (Some(start), Some(limit)) => Some(start.saturating_sub(limit)),
        _ => None,
    }
}

/// Build the best-effort dump for an undecodable payload
pub fn raw_report(port: i32, payload: &[u8]) -> RawReport {
    use base64::Engine;

    let hex: String = payload.iter().map(|b| format!("{:02x}", b)).collect();
    let b64 = base64::engine::general_purpose::STANDARD.encode(payload);

    let ascii = if !payload.is_empty()
        && payload
            .iter()
            .all(|&b| (0x20..0x7F).contains(&b) || b == b'\n' || b == b'\r' || b == b'\t')
    {
        Some(String::from_utf8_lossy(payload).into_owned())
    } else {
        None
    };

    let mut floats = Vec::new();
    if !payload.is_empty() && payload.len() % 4 == 0 && payload.len() <= 32 {
        for chunk in payload.chunks_exact(4) {
            let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if v.is_finite() && v.abs() < 1e9 {
                floats.push(v);
            } else {
                floats.clear();
                break;
            }
        }
    }

    RawReport {
        port,
        hex,
        base64: b64,
        ascii,
        floats,
    }
}
