//! Mesh packet interpreter
//!
//! Turns decoded device frames into [`MeshEvent`]s:
//!
//! 1. Parse the `FromRadio` protobuf
//! 2. Identity messages update the node registry
//! 3. Mesh packets are deduplicated, backlog-filtered, payload-decoded and
//!    summarized, with relay inference applied to the hop fields
//!
//! The interpreter owns every cache it mutates (registry, link stats,
//! dedup set); callers run it from a single task and read the caches
//! through accessors.

use chrono::{DateTime, Duration, TimeZone, Utc};
use prost::Message as _;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use crate::dedup::PacketDedup;
use crate::error::Result;
use crate::registry::{LastPosition, NodeId, NodeRecord, NodeRegistry};
use crate::relay::{is_direct_reception, resolve_relay, RelayLinkStats, ResolvedRelay};
use crate::summary::{
    raw_report, used_hops, MeshSummary, NeighborReport, NodeRef, PortKind, PositionReport,
    RelayRef, RouteReport, SummaryPayload, TelemetryReport, TextReport, WaypointReport,
};
use crate::tunables::{BACKLOG_GRACE_SECS, BACKLOG_SKEW_SECS, DEDUP_CAPACITY};
use igate_proto::proto::{self, from_radio, mesh_packet, routing, telemetry};

/// Interpreter behavior settings
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// How long after connect the backlog filter stays active
    pub backlog_grace: Duration,
    /// Allowed clock skew between device and station
    pub backlog_skew: Duration,
    /// Capacity of the packet dedup set
    pub dedup_capacity: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            backlog_grace: Duration::seconds(BACKLOG_GRACE_SECS),
            backlog_skew: Duration::seconds(BACKLOG_SKEW_SECS),
            dedup_capacity: DEDUP_CAPACITY,
        }
    }
}

/// One interpreted device message
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A mesh packet was decoded into a summary
    Summary(MeshSummary),
    /// A node identity record was created or updated
    NodeUpdated(NodeRecord),
    /// The device reported its own node number
    MyInfo(NodeId),
    /// The device finished streaming its config, echoing our nonce
    ConfigComplete(u32),
    /// The device rebooted since the last session
    Rebooted,
}

/// Stateful interpreter for the device message stream
#[derive(Debug)]
pub struct MeshInterpreter {
    config: InterpreterConfig,
    registry: NodeRegistry,
    link_stats: RelayLinkStats,
    dedup: PacketDedup,
    self_node: Option<NodeId>,
    connected_at: Option<DateTime<Utc>>,
    backlog_dropped: u64,
    flow_counter: u64,
}

impl MeshInterpreter {
    /// Create an interpreter with empty caches
    pub fn new(config: InterpreterConfig) -> Self {
        let dedup = PacketDedup::with_capacity(config.dedup_capacity);
        Self {
            config,
            registry: NodeRegistry::new(),
            link_stats: RelayLinkStats::new(),
            dedup,
            self_node: None,
            connected_at: None,
            backlog_dropped: 0,
            flow_counter: 0,
        }
    }

    /// Create an interpreter seeded with persisted caches
    pub fn with_state(
        config: InterpreterConfig,
        registry: NodeRegistry,
        link_stats: RelayLinkStats,
    ) -> Self {
        let dedup = PacketDedup::with_capacity(config.dedup_capacity);
        Self {
            config,
            registry,
            link_stats,
            dedup,
            self_node: None,
            connected_at: None,
            backlog_dropped: 0,
            flow_counter: 0,
        }
    }

    /// Record the moment the device connection was established; starts the
    /// backlog suppression window.
    pub fn mark_connected(&mut self, now: DateTime<Utc>) {
        self.connected_at = Some(now);
    }

    /// The station's own node number, once a MyInfo has been seen
    pub fn self_node(&self) -> Option<NodeId> {
        self.self_node
    }

    /// Read access to the node registry
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Read access to the link statistics table
    pub fn link_stats(&self) -> &RelayLinkStats {
        &self.link_stats
    }

    /// Operator reset of the node registry
    pub fn reset_registry(&mut self) {
        self.registry.reset();
    }

    /// Packets dropped by the backlog filter since startup
    pub fn backlog_dropped(&self) -> u64 {
        self.backlog_dropped
    }

    /// Interpret one framed device payload.
    ///
    /// Returns the events the payload produced; decode failures are errors
    /// the caller logs per-packet, they never invalidate interpreter state.
    pub fn handle_frame(&mut self, payload: &[u8], now: DateTime<Utc>) -> Result<Vec<MeshEvent>> {
        let msg = proto::FromRadio::decode(payload)?;

        let events = match msg.payload_variant {
            Some(from_radio::PayloadVariant::Packet(packet)) => self.handle_packet(packet, now),
            Some(from_radio::PayloadVariant::NodeInfo(info)) => self.handle_node_info(info, now),
            Some(from_radio::PayloadVariant::MyInfo(info)) => {
                let id = NodeId(info.my_node_num);
                debug!(node = %id, "Device reported own node number");
                self.self_node = Some(id);
                vec![MeshEvent::MyInfo(id)]
            }
            Some(from_radio::PayloadVariant::ConfigCompleteId(nonce)) => {
                vec![MeshEvent::ConfigComplete(nonce)]
            }
            Some(from_radio::PayloadVariant::Rebooted(_)) => vec![MeshEvent::Rebooted],
            None => {
                trace!(id = msg.id, "Ignoring FromRadio variant outside our subset");
                Vec::new()
            }
        };
        Ok(events)
    }

    fn handle_node_info(&mut self, info: proto::NodeInfo, now: DateTime<Utc>) -> Vec<MeshEvent> {
        let id = NodeId(info.num);
        if let Some(user) = &info.user {
            self.registry.apply_user(id, user, now);
        }
        if let Some(position) = &info.position {
            if let Some(last) = decode_last_position(position) {
                self.registry.apply_position(id, last, now);
            }
        }
        self.registry.touch(id, now);
        match self.registry.get(id) {
            Some(record) => vec![MeshEvent::NodeUpdated(record.clone())],
            None => Vec::new(),
        }
    }

    fn handle_packet(&mut self, packet: proto::MeshPacket, now: DateTime<Utc>) -> Vec<MeshEvent> {
        let from = NodeId(packet.from);
        let to = NodeId(packet.to);

        if self.dedup.check(from, packet.id) {
            trace!(from = %from, packet_id = packet.id, "Dropping re-received packet");
            return Vec::new();
        }

        if self.is_backlog(&packet, now) {
            self.backlog_dropped += 1;
            debug!(
                from = %from,
                rx_time = packet.rx_time,
                dropped = self.backlog_dropped,
                "Suppressing backlog packet from before connect"
            );
            return Vec::new();
        }

        let snr = (packet.rx_snr != 0.0).then_some(packet.rx_snr);
        let rssi = (packet.rx_rssi != 0).then_some(packet.rx_rssi);
        let hop_start = Some(packet.hop_start);
        let hop_limit = Some(packet.hop_limit);
        let used = used_hops(hop_start, hop_limit);

        // Relay inference, with next-hop fallback when the relay field
        // stays ambiguous on a packet that clearly was relayed.
        let mut resolved_relay = resolve_relay(
            packet.relay_node,
            snr,
            rssi,
            &self.link_stats,
            &self.registry,
            now,
        );
        if is_unresolved(resolved_relay.as_ref())
            && used.is_some_and(|h| h > 0)
            && packet.next_hop != 0
        {
            if let Some(via_next) = resolve_relay(
                packet.next_hop,
                snr,
                rssi,
                &self.link_stats,
                &self.registry,
                now,
            ) {
                if !is_unresolved(Some(&via_next)) {
                    resolved_relay = Some(ResolvedRelay {
                        guessed: true,
                        reason: Some(format!(
                            "inferred from next hop; {}",
                            via_next.reason.as_deref().unwrap_or("full id reported")
                        )),
                        ..via_next
                    });
                }
            }
        }
        let resolved_next_hop = resolve_relay(
            packet.next_hop,
            snr,
            rssi,
            &self.link_stats,
            &self.registry,
            now,
        );

        let direct = is_direct_reception(
            used,
            packet.relay_node,
            packet.next_hop,
            resolved_relay.as_ref(),
            self.self_node,
            from,
        );
        let from_self = self.self_node == Some(from);
        if direct && !from_self {
            self.link_stats.observe_direct(from, snr, rssi, now);
        }

        let (port, detail, payload, mut extra_events) = self.decode_payload(&packet, from, now);

        self.registry.touch(from, now);
        self.flow_counter += 1;

        let summary = MeshSummary {
            timestamp: now,
            channel: packet.channel,
            snr,
            rssi,
            hop_start,
            hop_limit,
            used_hops: used,
            port,
            detail,
            from: NodeRef {
                id: from,
                label: self.registry.label(from),
            },
            to: NodeRef {
                id: to,
                label: if to.is_broadcast() {
                    "broadcast".to_string()
                } else {
                    self.registry.label(to)
                },
            },
            relay: resolved_relay.map(|r| self.relay_ref(r)),
            next_hop: resolved_next_hop.map(|r| self.relay_ref(r)),
            payload,
            packet_id: packet.id,
            flow_id: format!("{}-{}", from.mesh_id(), self.flow_counter),
        };

        let mut events = vec![MeshEvent::Summary(summary)];
        events.append(&mut extra_events);
        events
    }

    fn relay_ref(&self, resolved: ResolvedRelay) -> RelayRef {
        // Forced tail results never got past the low byte; label them as a
        // truncated id so they cannot be mistaken for a full node number.
        let label = if resolved.guessed && resolved.id.0 <= 0xFF {
            format!("!..{:02x}", resolved.id.0)
        } else {
            self.registry.label(resolved.id)
        };
        RelayRef {
            id: resolved.id,
            label,
            guessed: resolved.guessed,
            reason: resolved.reason,
        }
    }

    fn is_backlog(&self, packet: &proto::MeshPacket, now: DateTime<Utc>) -> bool {
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        if packet.rx_time == 0 {
            return false;
        }
        if now >= connected_at + self.config.backlog_grace {
            return false;
        }
        match Utc.timestamp_opt(packet.rx_time as i64, 0).single() {
            Some(rx) => rx < connected_at - self.config.backlog_skew,
            None => false,
        }
    }

    /// Decode the application payload into a typed summary payload plus a
    /// one-line detail, emitting registry events as a side effect.
    fn decode_payload(
        &mut self,
        packet: &proto::MeshPacket,
        from: NodeId,
        now: DateTime<Utc>,
    ) -> (PortKind, String, SummaryPayload, Vec<MeshEvent>) {
        let data = match &packet.payload_variant {
            Some(mesh_packet::PayloadVariant::Decoded(data)) => data,
            Some(mesh_packet::PayloadVariant::Encrypted(bytes)) => {
                return (
                    PortKind::Other(0),
                    format!("encrypted payload ({} bytes)", bytes.len()),
                    SummaryPayload::Raw(raw_report(0, bytes)),
                    Vec::new(),
                );
            }
            None => {
                return (
                    PortKind::Other(0),
                    "empty packet".to_string(),
                    SummaryPayload::None,
                    Vec::new(),
                );
            }
        };

        let port = PortKind::from_port(data.portnum);
        match port {
            PortKind::Text => {
                let body = String::from_utf8_lossy(&data.payload).into_owned();
                let detail = body.clone();
                (
                    port,
                    detail,
                    SummaryPayload::Text(TextReport {
                        body,
                        channel: packet.channel,
                    }),
                    Vec::new(),
                )
            }
            PortKind::Position => match proto::Position::decode(data.payload.as_slice()) {
                Ok(position) => self.decode_position(port, position, from, now),
                Err(e) => self.decode_failure(port, data, &e.to_string()),
            },
            PortKind::NodeInfo => match proto::User::decode(data.payload.as_slice()) {
                Ok(user) => {
                    let record = self.registry.apply_user(from, &user, now).clone();
                    (
                        port,
                        format!("node info: {}", record.label()),
                        SummaryPayload::None,
                        vec![MeshEvent::NodeUpdated(record)],
                    )
                }
                Err(e) => self.decode_failure(port, data, &e.to_string()),
            },
            PortKind::Telemetry => match proto::Telemetry::decode(data.payload.as_slice()) {
                Ok(tele) => {
                    let report = decode_telemetry(&tele);
                    let detail = telemetry_detail(&report);
                    (port, detail, SummaryPayload::Telemetry(report), Vec::new())
                }
                Err(e) => self.decode_failure(port, data, &e.to_string()),
            },
            PortKind::Routing => match proto::Routing::decode(data.payload.as_slice()) {
                Ok(routing_msg) => {
                    let detail = self.routing_detail(&routing_msg);
                    (port, detail, SummaryPayload::None, Vec::new())
                }
                Err(e) => self.decode_failure(port, data, &e.to_string()),
            },
            PortKind::Traceroute => {
                match proto::RouteDiscovery::decode(data.payload.as_slice()) {
                    Ok(discovery) => {
                        let report = self.route_report(&discovery);
                        let detail = if report.towards.is_empty() {
                            "traceroute (no hops)".to_string()
                        } else {
                            format!("traceroute: {}", report.towards.join(" -> "))
                        };
                        (port, detail, SummaryPayload::Route(report), Vec::new())
                    }
                    Err(e) => self.decode_failure(port, data, &e.to_string()),
                }
            }
            PortKind::NeighborInfo => match proto::NeighborInfo::decode(data.payload.as_slice())
            {
                Ok(info) => {
                    let neighbors: Vec<(String, f32)> = info
                        .neighbors
                        .iter()
                        .map(|n| (self.registry.label(NodeId(n.node_id)), n.snr))
                        .collect();
                    let detail = format!("{} neighbors reported", neighbors.len());
                    (
                        port,
                        detail,
                        SummaryPayload::Neighbors(NeighborReport { neighbors }),
                        Vec::new(),
                    )
                }
                Err(e) => self.decode_failure(port, data, &e.to_string()),
            },
            PortKind::Waypoint => match proto::Waypoint::decode(data.payload.as_slice()) {
                Ok(wp) => {
                    let report = WaypointReport {
                        name: wp.name.clone(),
                        latitude: wp.latitude_i.map(|v| v as f64 * 1e-7),
                        longitude: wp.longitude_i.map(|v| v as f64 * 1e-7),
                    };
                    let detail = format!("waypoint: {}", wp.name);
                    (port, detail, SummaryPayload::Waypoint(report), Vec::new())
                }
                Err(e) => self.decode_failure(port, data, &e.to_string()),
            },
            PortKind::Admin => (
                port,
                format!("admin message ({} bytes)", data.payload.len()),
                SummaryPayload::Raw(raw_report(data.portnum, &data.payload)),
                Vec::new(),
            ),
            PortKind::Other(raw_port) => (
                port,
                format!("port {} ({} bytes)", raw_port, data.payload.len()),
                SummaryPayload::Raw(raw_report(raw_port, &data.payload)),
                Vec::new(),
            ),
        }
    }

    fn decode_position(
        &mut self,
        port: PortKind,
        position: proto::Position,
        from: NodeId,
        now: DateTime<Utc>,
    ) -> (PortKind, String, SummaryPayload, Vec<MeshEvent>) {
        let lat = position.latitude_i.map(|v| v as f64 * 1e-7);
        let lon = position.longitude_i.map(|v| v as f64 * 1e-7);
        let (Some(latitude), Some(longitude)) = (lat, lon) else {
            return (
                port,
                "position without fix".to_string(),
                SummaryPayload::None,
                Vec::new(),
            );
        };
        if latitude == 0.0 && longitude == 0.0 {
            return (
                port,
                "position without fix".to_string(),
                SummaryPayload::None,
                Vec::new(),
            );
        }

        let report = PositionReport {
            latitude,
            longitude,
            altitude: position.altitude,
            course: position.ground_track.map(|v| v as f64 * 1e-5),
            speed_mps: position.ground_speed.map(|v| v as f64),
            sats: (position.sats_in_view > 0).then_some(position.sats_in_view),
        };

        let record = self
            .registry
            .apply_position(
                from,
                LastPosition {
                    latitude,
                    longitude,
                    altitude: report.altitude,
                },
                now,
            )
            .clone();

        let mut detail = format!("position {:.5}, {:.5}", latitude, longitude);
        if let Some(alt) = report.altitude {
            detail.push_str(&format!(" alt {}m", alt));
        }
        (
            port,
            detail,
            SummaryPayload::Position(report),
            vec![MeshEvent::NodeUpdated(record)],
        )
    }

    fn decode_failure(
        &self,
        port: PortKind,
        data: &proto::Data,
        reason: &str,
    ) -> (PortKind, String, SummaryPayload, Vec<MeshEvent>) {
        warn!(port = %port, reason, "Failed to decode payload, keeping raw dump");
        (
            port,
            format!("undecodable {} payload", port),
            SummaryPayload::Raw(raw_report(data.portnum, &data.payload)),
            Vec::new(),
        )
    }

    fn routing_detail(&self, msg: &proto::Routing) -> String {
        match &msg.variant {
            Some(routing::Variant::RouteRequest(_)) => "route request".to_string(),
            Some(routing::Variant::RouteReply(discovery)) => {
                format!("route reply ({} hops)", discovery.route.len())
            }
            Some(routing::Variant::ErrorReason(code)) => {
                format!("routing error {}", code)
            }
            None => "routing control".to_string(),
        }
    }

    fn route_report(&self, discovery: &proto::RouteDiscovery) -> RouteReport {
        let label_hops = |route: &[u32], snrs: &[i32]| {
            route
                .iter()
                .enumerate()
                .map(|(i, &num)| {
                    let label = self.registry.label(NodeId(num));
                    // Wire SNR values are dB scaled by 4.
                    match snrs.get(i) {
                        Some(&raw) if raw != i32::MIN => {
                            format!("{} ({:.2}dB)", label, raw as f64 / 4.0)
                        }
                        _ => label,
                    }
                })
                .collect()
        };
        RouteReport {
            towards: label_hops(&discovery.route, &discovery.snr_towards),
            back: label_hops(&discovery.route_back, &discovery.snr_back),
        }
    }
}

fn decode_last_position(position: &proto::Position) -> Option<LastPosition> {
    let latitude = position.latitude_i.map(|v| v as f64 * 1e-7)?;
    let longitude = position.longitude_i.map(|v| v as f64 * 1e-7)?;
    if latitude == 0.0 && longitude == 0.0 {
        return None;
    }
    Some(LastPosition {
        latitude,
        longitude,
        altitude: position.altitude,
    })
}

fn decode_telemetry(tele: &proto::Telemetry) -> TelemetryReport {
    let mut metrics = BTreeMap::new();
    let kind = match &tele.variant {
        Some(telemetry::Variant::DeviceMetrics(m)) => {
            insert_opt(&mut metrics, "battery_level", m.battery_level.map(f64::from));
            insert_opt(&mut metrics, "voltage", m.voltage.map(f64::from));
            insert_opt(
                &mut metrics,
                "channel_utilization",
                m.channel_utilization.map(f64::from),
            );
            insert_opt(&mut metrics, "air_util_tx", m.air_util_tx.map(f64::from));
            insert_opt(
                &mut metrics,
                "uptime_seconds",
                m.uptime_seconds.map(f64::from),
            );
            "device"
        }
        Some(telemetry::Variant::EnvironmentMetrics(m)) => {
            insert_opt(&mut metrics, "temperature", m.temperature.map(f64::from));
            insert_opt(
                &mut metrics,
                "relative_humidity",
                m.relative_humidity.map(f64::from),
            );
            insert_opt(
                &mut metrics,
                "barometric_pressure",
                m.barometric_pressure.map(f64::from),
            );
            insert_opt(
                &mut metrics,
                "gas_resistance",
                m.gas_resistance.map(f64::from),
            );
            insert_opt(&mut metrics, "voltage", m.voltage.map(f64::from));
            insert_opt(&mut metrics, "current", m.current.map(f64::from));
            insert_opt(&mut metrics, "iaq", m.iaq.map(f64::from));
            "environment"
        }
        Some(telemetry::Variant::PowerMetrics(m)) => {
            insert_opt(&mut metrics, "ch1_voltage", m.ch1_voltage.map(f64::from));
            insert_opt(&mut metrics, "ch1_current", m.ch1_current.map(f64::from));
            insert_opt(&mut metrics, "ch2_voltage", m.ch2_voltage.map(f64::from));
            insert_opt(&mut metrics, "ch2_current", m.ch2_current.map(f64::from));
            insert_opt(&mut metrics, "ch3_voltage", m.ch3_voltage.map(f64::from));
            insert_opt(&mut metrics, "ch3_current", m.ch3_current.map(f64::from));
            "power"
        }
        None => "unknown",
    };
    TelemetryReport {
        kind: kind.to_string(),
        metrics,
    }
}

fn insert_opt(map: &mut BTreeMap<String, f64>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v);
    }
}

fn telemetry_detail(report: &TelemetryReport) -> String {
    if report.metrics.is_empty() {
        return format!("{} telemetry", report.kind);
    }
    let fields: Vec<String> = report
        .metrics
        .iter()
        .take(3)
        .map(|(k, v)| format!("{}={:.2}", k, v))
        .collect();
    format!("{} telemetry: {}", report.kind, fields.join(", "))
}

fn is_unresolved(resolved: Option<&ResolvedRelay>) -> bool {
    match resolved {
        None => true,
        Some(r) => r.guessed && r.id.0 <= 0xFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igate_proto::proto::PortNum;

    fn text_packet(from: u32, id: u32, body: &str) -> proto::FromRadio {
        proto::FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::Packet(proto::MeshPacket {
                from,
                to: 0xFFFF_FFFF,
                channel: 0,
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                    portnum: PortNum::TextMessageApp as i32,
                    payload: body.as_bytes().to_vec(),
                    ..Default::default()
                })),
                id,
                rx_snr: 6.0,
                rx_rssi: -90,
                hop_start: 3,
                hop_limit: 3,
                ..Default::default()
            })),
        }
    }

    fn encode(msg: &proto::FromRadio) -> Vec<u8> {
        msg.encode_to_vec()
    }

    fn summaries(events: Vec<MeshEvent>) -> Vec<MeshSummary> {
        events
            .into_iter()
            .filter_map(|e| match e {
                MeshEvent::Summary(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn text_packet_produces_summary() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let now = Utc::now();

        let events = interp
            .handle_frame(&encode(&text_packet(0x11, 100, "hello")), now)
            .unwrap();
        let sums = summaries(events);
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].port, PortKind::Text);
        assert_eq!(sums[0].detail, "hello");
        assert_eq!(sums[0].used_hops, Some(0));
        assert_eq!(sums[0].to.label, "broadcast");
    }

    #[test]
    fn duplicate_packet_is_dropped() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let now = Utc::now();

        let msg = encode(&text_packet(0x11, 100, "hello"));
        assert_eq!(summaries(interp.handle_frame(&msg, now).unwrap()).len(), 1);
        assert_eq!(summaries(interp.handle_frame(&msg, now).unwrap()).len(), 0);
    }

    #[test]
    fn zero_packet_id_always_emits() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let now = Utc::now();

        let msg = encode(&text_packet(0x11, 0, "hello"));
        assert_eq!(summaries(interp.handle_frame(&msg, now).unwrap()).len(), 1);
        assert_eq!(summaries(interp.handle_frame(&msg, now).unwrap()).len(), 1);
    }

    #[test]
    fn my_info_sets_self_node() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let msg = proto::FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::MyInfo(proto::MyNodeInfo {
                my_node_num: 0xCAFE_F00D,
                ..Default::default()
            })),
        };
        let events = interp.handle_frame(&encode(&msg), Utc::now()).unwrap();
        assert!(matches!(events[0], MeshEvent::MyInfo(NodeId(0xCAFE_F00D))));
        assert_eq!(interp.self_node(), Some(NodeId(0xCAFE_F00D)));
    }

    #[test]
    fn node_info_updates_registry() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let msg = proto::FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::NodeInfo(proto::NodeInfo {
                num: 0x42,
                user: Some(proto::User {
                    long_name: "Trailhead".into(),
                    short_name: "TRL".into(),
                    ..Default::default()
                }),
                ..Default::default()
            })),
        };
        let events = interp.handle_frame(&encode(&msg), Utc::now()).unwrap();
        assert!(matches!(events[0], MeshEvent::NodeUpdated(_)));
        assert_eq!(interp.registry().label(NodeId(0x42)), "Trailhead (!00000042)");
    }

    #[test]
    fn direct_reception_updates_link_stats() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let now = Utc::now();

        // hop_start == hop_limit means zero hops used
        interp
            .handle_frame(&encode(&text_packet(0x1234_5678, 5, "direct")), now)
            .unwrap();

        let stat = interp.link_stats().get(NodeId(0x1234_5678)).unwrap();
        assert_eq!(stat.samples, 1);
        assert!((stat.snr - 6.0).abs() < 1e-9);
    }

    #[test]
    fn relayed_packet_does_not_update_sender_stats() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let now = Utc::now();

        // Seed a known relay so the relay field resolves to a third node.
        let mut seed = text_packet(0xAABB_CC55, 1, "seed");
        if let Some(from_radio::PayloadVariant::Packet(p)) = &mut seed.payload_variant {
            p.hop_start = 3;
            p.hop_limit = 3;
        }
        interp.handle_frame(&encode(&seed), now).unwrap();

        let mut relayed = text_packet(0x1111_2222, 2, "relayed");
        if let Some(from_radio::PayloadVariant::Packet(p)) = &mut relayed.payload_variant {
            p.hop_start = 3;
            p.hop_limit = 2; // one hop used
            p.relay_node = 0x55;
        }
        let events = interp.handle_frame(&encode(&relayed), now).unwrap();
        let sums = summaries(events);

        let relay = sums[0].relay.as_ref().unwrap();
        assert_eq!(relay.id, NodeId(0xAABB_CC55));
        assert!(interp.link_stats().get(NodeId(0x1111_2222)).is_none());
    }

    #[test]
    fn backlog_packets_are_suppressed_after_connect() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let now = Utc::now();
        interp.mark_connected(now);

        let mut old = text_packet(0x11, 10, "stale");
        if let Some(from_radio::PayloadVariant::Packet(p)) = &mut old.payload_variant {
            p.rx_time = (now - Duration::minutes(10)).timestamp() as u32;
        }
        let events = interp.handle_frame(&encode(&old), now).unwrap();
        assert!(summaries(events).is_empty());
        assert_eq!(interp.backlog_dropped(), 1);

        // A current packet passes
        let mut fresh = text_packet(0x11, 11, "fresh");
        if let Some(from_radio::PayloadVariant::Packet(p)) = &mut fresh.payload_variant {
            p.rx_time = now.timestamp() as u32;
        }
        let events = interp.handle_frame(&encode(&fresh), now).unwrap();
        assert_eq!(summaries(events).len(), 1);
    }

    #[test]
    fn backlog_filter_expires_after_grace() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let connected = Utc::now();
        interp.mark_connected(connected);

        let later = connected + Duration::seconds(BACKLOG_GRACE_SECS + 5);
        let mut old = text_packet(0x11, 10, "old but valid now");
        if let Some(from_radio::PayloadVariant::Packet(p)) = &mut old.payload_variant {
            p.rx_time = (connected - Duration::minutes(10)).timestamp() as u32;
        }
        let events = interp.handle_frame(&encode(&old), later).unwrap();
        assert_eq!(summaries(events).len(), 1);
    }

    #[test]
    fn position_packet_updates_registry_and_summary() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let now = Utc::now();

        let position = proto::Position {
            latitude_i: Some(250_330_000),
            longitude_i: Some(1_215_650_000),
            altitude: Some(45),
            ..Default::default()
        };
        let msg = proto::FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::Packet(proto::MeshPacket {
                from: 0x77,
                to: 0xFFFF_FFFF,
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                    portnum: PortNum::PositionApp as i32,
                    payload: position.encode_to_vec(),
                    ..Default::default()
                })),
                id: 9,
                hop_start: 3,
                hop_limit: 3,
                ..Default::default()
            })),
        };

        let events = interp.handle_frame(&encode(&msg), now).unwrap();
        let sums = summaries(events);
        match &sums[0].payload {
            SummaryPayload::Position(report) => {
                assert!((report.latitude - 25.033).abs() < 1e-6);
                assert!((report.longitude - 121.565).abs() < 1e-6);
                assert_eq!(report.altitude, Some(45));
            }
            other => panic!("expected position payload, got {:?}", other),
        }
        assert!(interp
            .registry()
            .get(NodeId(0x77))
            .unwrap()
            .last_position
            .is_some());
    }

    #[test]
    fn unknown_port_gets_raw_dump() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let msg = proto::FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::Packet(proto::MeshPacket {
                from: 0x11,
                to: 0xFFFF_FFFF,
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                    portnum: 260,
                    payload: b"opaque".to_vec(),
                    ..Default::default()
                })),
                id: 3,
                hop_start: 3,
                hop_limit: 3,
                ..Default::default()
            })),
        };
        let events = interp.handle_frame(&encode(&msg), Utc::now()).unwrap();
        let sums = summaries(events);
        match &sums[0].payload {
            SummaryPayload::Raw(raw) => {
                assert_eq!(raw.ascii.as_deref(), Some("opaque"));
                assert_eq!(raw.port, 260);
            }
            other => panic!("expected raw payload, got {:?}", other),
        }
    }

    #[test]
    fn malformed_inner_payload_keeps_stream_alive() {
        let mut interp = MeshInterpreter::new(InterpreterConfig::default());
        let msg = proto::FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::Packet(proto::MeshPacket {
                from: 0x11,
                to: 0xFFFF_FFFF,
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                    portnum: PortNum::PositionApp as i32,
                    payload: vec![0xFF, 0xFF, 0xFF], // not a valid Position
                    ..Default::default()
                })),
                id: 3,
                hop_start: 3,
                hop_limit: 3,
                ..Default::default()
            })),
        };
        let events = interp.handle_frame(&encode(&msg), Utc::now()).unwrap();
        let sums = summaries(events);
        assert_eq!(sums.len(), 1);
        assert!(matches!(sums[0].payload, SummaryPayload::Raw(_)));
    }
}
