//! Hand-maintained subset of the mesh device protobuf schema
//!
//! Only the messages and fields the gateway consumes are declared; prost
//! skips unknown fields and unknown oneof variants, so devices running newer
//! firmware remain decodable. Field tags follow the published device
//! protocol and must not be changed.

/// Payload type discriminator carried in [`Data::portnum`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PortNum {
    /// Unset / unknown application
    UnknownApp = 0,
    /// UTF-8 text message
    TextMessageApp = 1,
    /// Remote hardware control
    RemoteHardwareApp = 2,
    /// Position report
    PositionApp = 3,
    /// Node identity (user record)
    NodeinfoApp = 4,
    /// Routing control
    RoutingApp = 5,
    /// Administrative messages
    AdminApp = 6,
    /// Compressed text message
    TextMessageCompressedApp = 7,
    /// Shared waypoint
    WaypointApp = 8,
    /// Audio stream
    AudioApp = 9,
    /// Detection sensor event
    DetectionSensorApp = 10,
    /// Alert broadcast
    AlertApp = 11,
    /// Reply/ping
    ReplyApp = 32,
    /// IP tunnel
    IpTunnelApp = 33,
    /// People counter
    PaxcounterApp = 34,
    /// Serial passthrough
    SerialApp = 64,
    /// Store and forward
    StoreForwardApp = 65,
    /// Range test
    RangeTestApp = 66,
    /// Telemetry metrics
    TelemetryApp = 67,
    /// Zero-positioning system
    ZpsApp = 68,
    /// Simulator traffic
    SimulatorApp = 69,
    /// Route tracing
    TracerouteApp = 70,
    /// Neighbor tables
    NeighborinfoApp = 71,
    /// ATAK plugin
    AtakPlugin = 72,
    /// Map report
    MapReportApp = 73,
    /// First private application port
    PrivateApp = 256,
    /// ATAK forwarder
    AtakForwarder = 257,
    /// Largest assignable port
    Max = 511,
}

/// Decoded application payload of a mesh packet
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    /// Application port
    #[prost(enumeration = "PortNum", tag = "1")]
    pub portnum: i32,
    /// Application payload bytes
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    /// Sender requests a response
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    /// Original destination for multi-hop replies
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    /// Original source for multi-hop replies
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    /// Request id this payload answers
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
    /// Packet id this payload replies to
    #[prost(fixed32, tag = "7")]
    pub reply_id: u32,
    /// Emoji reaction marker
    #[prost(fixed32, tag = "8")]
    pub emoji: u32,
    #[prost(uint32, optional, tag = "9")]
    pub bitfield: Option<u32>,
}

/// One packet moving through the mesh
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshPacket {
    /// Sending node number
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    /// Destination node number (0xFFFFFFFF broadcasts)
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    /// Channel index
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    /// Decoded or encrypted payload
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
    pub payload_variant: Option<mesh_packet::PayloadVariant>,
    /// Packet id (0 when the sender did not assign one)
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    /// Receive time, epoch seconds
    #[prost(fixed32, tag = "7")]
    pub rx_time: u32,
    /// SNR of the received transmission, dB
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    /// Remaining retransmissions allowed
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    /// Sender requests an acknowledgement
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    /// RSSI of the received transmission, dBm
    #[prost(int32, tag = "12")]
    pub rx_rssi: i32,
    /// Arrived via an MQTT bridge rather than RF
    #[prost(bool, tag = "14")]
    pub via_mqtt: bool,
    /// Hop limit the sender started with
    #[prost(uint32, tag = "15")]
    pub hop_start: u32,
    /// Next-hop node, low byte only on the wire
    #[prost(uint32, tag = "18")]
    pub next_hop: u32,
    /// Relaying node, low byte only on the wire
    #[prost(uint32, tag = "19")]
    pub relay_node: u32,
}

/// Nested types for [`MeshPacket`]
pub mod mesh_packet {
    /// Payload of a mesh packet
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// Cleartext application payload
        #[prost(message, tag = "4")]
        Decoded(super::Data),
        /// Encrypted payload this station cannot read
        #[prost(bytes, tag = "5")]
        Encrypted(Vec<u8>),
    }
}

/// Geographic position report
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Position {
    /// Latitude in 1e-7 degrees
    #[prost(sfixed32, optional, tag = "1")]
    pub latitude_i: Option<i32>,
    /// Longitude in 1e-7 degrees
    #[prost(sfixed32, optional, tag = "2")]
    pub longitude_i: Option<i32>,
    /// Altitude above MSL, meters
    #[prost(int32, optional, tag = "3")]
    pub altitude: Option<i32>,
    /// Fix time, epoch seconds
    #[prost(fixed32, tag = "4")]
    pub time: u32,
    /// Ground speed, m/s
    #[prost(uint32, optional, tag = "15")]
    pub ground_speed: Option<u32>,
    /// Ground track in 1e-5 degrees
    #[prost(fixed32, optional, tag = "16")]
    pub ground_track: Option<u32>,
    /// Satellites used for the fix
    #[prost(uint32, tag = "19")]
    pub sats_in_view: u32,
}

/// Node identity record broadcast on the mesh
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    /// Canonical node id string (`!` + 8 hex digits)
    #[prost(string, tag = "1")]
    pub id: String,
    /// Full display name
    #[prost(string, tag = "2")]
    pub long_name: String,
    /// Short display name (up to 4 chars)
    #[prost(string, tag = "3")]
    pub short_name: String,
    /// Hardware model code
    #[prost(int32, tag = "5")]
    pub hw_model: i32,
    /// Operator holds an amateur license
    #[prost(bool, tag = "6")]
    pub is_licensed: bool,
    /// Device role code
    #[prost(int32, tag = "7")]
    pub role: i32,
}

/// Everything the device knows about one mesh node
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeInfo {
    /// Node number
    #[prost(uint32, tag = "1")]
    pub num: u32,
    /// Identity record
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    /// Last known position
    #[prost(message, optional, tag = "3")]
    pub position: Option<Position>,
    /// SNR of the last direct reception, dB
    #[prost(float, tag = "4")]
    pub snr: f32,
    /// Last heard, epoch seconds
    #[prost(fixed32, tag = "5")]
    pub last_heard: u32,
    /// Latest device metrics
    #[prost(message, optional, tag = "6")]
    pub device_metrics: Option<DeviceMetrics>,
    /// Channel the node was heard on
    #[prost(uint32, tag = "7")]
    pub channel: u32,
    /// Hops between this station and the node
    #[prost(uint32, optional, tag = "9")]
    pub hops_away: Option<u32>,
}

/// The connected device's own identity
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MyNodeInfo {
    /// This station's node number
    #[prost(uint32, tag = "1")]
    pub my_node_num: u32,
    /// Reboots since first boot
    #[prost(uint32, tag = "8")]
    pub reboot_count: u32,
    /// Minimum app version the firmware accepts
    #[prost(uint32, tag = "11")]
    pub min_app_version: u32,
}

/// Battery / radio utilization metrics
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceMetrics {
    #[prost(uint32, optional, tag = "1")]
    pub battery_level: Option<u32>,
    #[prost(float, optional, tag = "2")]
    pub voltage: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub channel_utilization: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub air_util_tx: Option<f32>,
    #[prost(uint32, optional, tag = "5")]
    pub uptime_seconds: Option<u32>,
}

/// Environmental sensor metrics
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnvironmentMetrics {
    #[prost(float, optional, tag = "1")]
    pub temperature: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub relative_humidity: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub barometric_pressure: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub gas_resistance: Option<f32>,
    #[prost(float, optional, tag = "5")]
    pub voltage: Option<f32>,
    #[prost(float, optional, tag = "6")]
    pub current: Option<f32>,
    #[prost(uint32, optional, tag = "7")]
    pub iaq: Option<u32>,
}

/// External power monitoring metrics
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PowerMetrics {
    #[prost(float, optional, tag = "1")]
    pub ch1_voltage: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub ch1_current: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub ch2_voltage: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub ch2_current: Option<f32>,
    #[prost(float, optional, tag = "5")]
    pub ch3_voltage: Option<f32>,
    #[prost(float, optional, tag = "6")]
    pub ch3_current: Option<f32>,
}

/// Periodic metric report
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Telemetry {
    /// Measurement time, epoch seconds
    #[prost(fixed32, tag = "1")]
    pub time: u32,
    /// Which metric family this report carries
    #[prost(oneof = "telemetry::Variant", tags = "2, 3, 5")]
    pub variant: Option<telemetry::Variant>,
}

/// Nested types for [`Telemetry`]
pub mod telemetry {
    /// Metric family
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        /// Battery / utilization metrics
        #[prost(message, tag = "2")]
        DeviceMetrics(super::DeviceMetrics),
        /// Environmental sensor metrics
        #[prost(message, tag = "3")]
        EnvironmentMetrics(super::EnvironmentMetrics),
        /// Power monitor metrics
        #[prost(message, tag = "5")]
        PowerMetrics(super::PowerMetrics),
    }
}

/// Route discovered by a traceroute exchange
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteDiscovery {
    /// Node numbers along the forward route
    #[prost(fixed32, repeated, tag = "1")]
    pub route: Vec<u32>,
    /// Per-hop SNR towards the destination, dB scaled by 4
    #[prost(int32, repeated, tag = "2")]
    pub snr_towards: Vec<i32>,
    /// Node numbers along the return route
    #[prost(fixed32, repeated, tag = "3")]
    pub route_back: Vec<u32>,
    /// Per-hop SNR on the return route, dB scaled by 4
    #[prost(int32, repeated, tag = "4")]
    pub snr_back: Vec<i32>,
}

/// Routing control payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Routing {
    /// Control variant
    #[prost(oneof = "routing::Variant", tags = "1, 2, 3")]
    pub variant: Option<routing::Variant>,
}

/// Nested types for [`Routing`]
pub mod routing {
    /// Routing control variant
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        /// Request to discover a route
        #[prost(message, tag = "1")]
        RouteRequest(super::RouteDiscovery),
        /// Reply with a discovered route
        #[prost(message, tag = "2")]
        RouteReply(super::RouteDiscovery),
        /// Delivery error code
        #[prost(int32, tag = "3")]
        ErrorReason(i32),
    }
}

/// One entry in a neighbor table broadcast
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Neighbor {
    /// Neighbor node number
    #[prost(uint32, tag = "1")]
    pub node_id: u32,
    /// SNR heard from the neighbor, dB
    #[prost(float, tag = "2")]
    pub snr: f32,
}

/// Neighbor table broadcast
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NeighborInfo {
    /// Reporting node number
    #[prost(uint32, tag = "1")]
    pub node_id: u32,
    /// Node that last relayed this report
    #[prost(uint32, tag = "2")]
    pub last_sent_by_id: u32,
    /// Reporting interval, seconds
    #[prost(uint32, tag = "3")]
    pub node_broadcast_interval_secs: u32,
    /// Directly heard neighbors
    #[prost(message, repeated, tag = "4")]
    pub neighbors: Vec<Neighbor>,
}

/// Shared map waypoint
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Waypoint {
    /// Waypoint id
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Latitude in 1e-7 degrees
    #[prost(sfixed32, optional, tag = "2")]
    pub latitude_i: Option<i32>,
    /// Longitude in 1e-7 degrees
    #[prost(sfixed32, optional, tag = "3")]
    pub longitude_i: Option<i32>,
    /// Expiry, epoch seconds
    #[prost(uint32, tag = "4")]
    pub expire: u32,
    /// Waypoint name
    #[prost(string, tag = "6")]
    pub name: String,
    /// Waypoint description
    #[prost(string, tag = "7")]
    pub description: String,
}

/// One message from the device to this station
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromRadio {
    /// Monotonic message id assigned by the device
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Message body
    #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 4, 7, 8")]
    pub payload_variant: Option<from_radio::PayloadVariant>,
}

/// Nested types for [`FromRadio`]
pub mod from_radio {
    /// Body of a device-to-station message
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// A packet heard on the mesh
        #[prost(message, tag = "2")]
        Packet(super::MeshPacket),
        /// The device's own identity
        #[prost(message, tag = "3")]
        MyInfo(super::MyNodeInfo),
        /// A known-node record from the device database
        #[prost(message, tag = "4")]
        NodeInfo(super::NodeInfo),
        /// End-of-config marker echoing the requested nonce
        #[prost(uint32, tag = "7")]
        ConfigCompleteId(u32),
        /// Device rebooted since the last session
        #[prost(bool, tag = "8")]
        Rebooted(bool),
    }
}

/// Keepalive sent to the device
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Heartbeat {}

/// One message from this station to the device
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToRadio {
    /// Message body
    #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3, 4, 7")]
    pub payload_variant: Option<to_radio::PayloadVariant>,
}

/// Nested types for [`ToRadio`]
pub mod to_radio {
    /// Body of a station-to-device message
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// A packet to transmit on the mesh
        #[prost(message, tag = "1")]
        Packet(super::MeshPacket),
        /// Request the device config stream, echoed back on completion
        #[prost(uint32, tag = "3")]
        WantConfigId(u32),
        /// Orderly disconnect
        #[prost(bool, tag = "4")]
        Disconnect(bool),
        /// Link keepalive
        #[prost(message, tag = "7")]
        Heartbeat(super::Heartbeat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn mesh_packet_roundtrip() {
        let packet = MeshPacket {
            from: 0x1234_5678,
            to: 0xFFFF_FFFF,
            channel: 0,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                portnum: PortNum::TextMessageApp as i32,
                payload: b"hello mesh".to_vec(),
                ..Default::default()
            })),
            id: 42,
            rx_time: 1_700_000_000,
            rx_snr: 6.5,
            hop_limit: 3,
            rx_rssi: -88,
            hop_start: 3,
            relay_node: 0x78,
            ..Default::default()
        };

        let bytes = packet.encode_to_vec();
        let decoded = MeshPacket::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn from_radio_packet_roundtrip() {
        let msg = FromRadio {
            id: 7,
            payload_variant: Some(from_radio::PayloadVariant::MyInfo(MyNodeInfo {
                my_node_num: 0xDEAD_BEEF,
                ..Default::default()
            })),
        };
        let decoded = FromRadio::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_oneof_variant_decodes_as_none() {
        // Tag 6 (log_record) is not declared in our subset; the decoder
        // must skip it rather than fail.
        let mut buf = Vec::new();
        // field 1 (id), varint 9
        buf.extend_from_slice(&[0x08, 0x09]);
        // field 6, length-delimited, 2 bytes of embedded message
        buf.extend_from_slice(&[0x32, 0x02, 0x08, 0x01]);

        let decoded = FromRadio::decode(buf.as_slice()).unwrap();
        assert_eq!(decoded.id, 9);
        assert!(decoded.payload_variant.is_none());
    }

    #[test]
    fn portnum_from_i32() {
        assert_eq!(PortNum::try_from(3).ok(), Some(PortNum::PositionApp));
        assert_eq!(PortNum::try_from(67).ok(), Some(PortNum::TelemetryApp));
        assert!(PortNum::try_from(9999).is_err());
    }

    #[test]
    fn telemetry_variant_roundtrip() {
        let t = Telemetry {
            time: 1_700_000_123,
            variant: Some(telemetry::Variant::DeviceMetrics(DeviceMetrics {
                battery_level: Some(87),
                voltage: Some(3.92),
                channel_utilization: Some(12.5),
                air_util_tx: None,
                uptime_seconds: Some(3600),
            })),
        };
        let decoded = Telemetry::decode(t.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, t);
    }
}
