//! End-to-end orchestrator tests
//!
//! Drive a full gateway task over mock device, APRS and backend endpoints:
//! frames in, provisioning and mappings from the heartbeat, uplinks and
//! events out.

use std::sync::Arc;
use std::time::Duration;

use prost::Message as _;

use igate_aprs::MockIo;
use igate_gateway::test_utils::{MockBackend, MockTransport};
use igate_gateway::{
    Gateway, GatewayConfigBuilder, GatewayEvent, HeartbeatResponse, MappingEntry,
    MappingsResponse, ProvisioningRecord,
};
use igate_proto::proto::{self, from_radio, mesh_packet, PortNum};
use igate_state::{MemoryStore, RecordStore};

fn provisioning() -> ProvisioningRecord {
    ProvisioningRecord {
        callsign: "N0CALL".to_string(),
        ssid: Some(10),
        symbol_table: Some('/'),
        symbol_code: Some('&'),
        phg: None,
        comment: Some("mesh gw".to_string()),
        latitude: Some(25.033),
        longitude: Some(121.565),
        altitude: None,
    }
}

fn mapping() -> MappingEntry {
    MappingEntry {
        mesh_id: "!0a1b2c3d".to_string(),
        callsign: "KD8ABC".to_string(),
        ssid: Some(7),
        symbol_table: None,
        symbol_code: None,
        comment: None,
    }
}

fn position_frame(from: u32, id: u32, lat: f64, lon: f64) -> Vec<u8> {
    let position = proto::Position {
        latitude_i: Some((lat * 1e7) as i32),
        longitude_i: Some((lon * 1e7) as i32),
        ..Default::default()
    };
    let msg = proto::FromRadio {
        id: 1,
        payload_variant: Some(from_radio::PayloadVariant::Packet(proto::MeshPacket {
            from,
            to: 0xFFFF_FFFF,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                portnum: PortNum::PositionApp as i32,
                payload: position.encode_to_vec(),
                ..Default::default()
            })),
            id,
            rx_snr: 5.0,
            rx_rssi: -85,
            hop_start: 3,
            hop_limit: 3,
            ..Default::default()
        })),
    };
    igate_proto::frame(&msg.encode_to_vec()).unwrap()
}

async fn next_event(
    rx: &mut tokio::sync::broadcast::Receiver<GatewayEvent>,
) -> Option<GatewayEvent> {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .ok()
        .and_then(|r| r.ok())
}

#[tokio::test(start_paused = true)]
async fn mesh_position_flows_to_aprs_uplink() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    store
        .set(
            "provisioning",
            "current",
            serde_json::to_value(provisioning()).unwrap(),
        )
        .await
        .unwrap();

    let transport = MockTransport::new();
    let device = transport.handle();
    let mut io = MockIo::new();
    io.push_incoming("# logresp N0CALL-10 verified, server T2TEST\r\n");

    let backend = MockBackend::new();
    backend.push_heartbeat(Ok(HeartbeatResponse {
        needs_update: true,
        hash: Some("v1".to_string()),
        server_time: None,
        provision: None,
    }));
    backend.push_mappings(Ok(MappingsResponse {
        hash: "v1".to_string(),
        items: vec![mapping()],
    }));

    // A frame with leading garbage: the decoder must resynchronize.
    let mut noisy = b"boot noise\r\n".to_vec();
    noisy.extend_from_slice(&position_frame(0x0A1B_2C3D, 42, 25.04, 121.57));
    device.feed(noisy);

    let config = GatewayConfigBuilder::new().build();
    let (gateway, handle) = Gateway::new(config, transport, io, backend, store);
    let mut events = handle.subscribe();
    let task = tokio::spawn(gateway.run());

    let mut saw_summary = false;
    let mut beacon_line = None;
    let mut forwarded_line = None;
    while !saw_summary || beacon_line.is_none() || forwarded_line.is_none() {
        let Some(event) = next_event(&mut events).await else {
            break;
        };
        match event {
            GatewayEvent::MeshSummary(summary) => {
                assert_eq!(summary.from.id.mesh_id(), "!0a1b2c3d");
                saw_summary = true;
            }
            GatewayEvent::AprsUplink(uplink) if uplink.flow_id.is_none() => {
                if uplink.line.contains(":!") {
                    beacon_line = Some(uplink.line);
                }
            }
            GatewayEvent::AprsUplink(uplink) => {
                forwarded_line = Some(uplink.line);
            }
            _ => {}
        }
    }

    assert!(saw_summary, "no mesh summary event");
    let beacon = beacon_line.expect("no self beacon uplink");
    assert!(
        beacon.starts_with("N0CALL-10>APZIGT,TCPIP*:!2501.98N/12133.90E&"),
        "unexpected beacon: {}",
        beacon
    );
    let forwarded = forwarded_line.expect("no forwarded uplink");
    assert!(
        forwarded.starts_with("KD8ABC-7>APZIGT,TCPIP*,qAR,N0CALL-10:!"),
        "unexpected forward: {}",
        forwarded
    );

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.aprs_state, "verified");
    assert_eq!(snapshot.mapping_count, 1);
    assert!(snapshot.backend_verified);
    assert!(snapshot.device_connected);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_surfaces_and_stops_heartbeats() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    store
        .set("meta", "api_key", serde_json::json!("stale-key"))
        .await
        .unwrap();

    let transport = MockTransport::new();
    let backend = MockBackend::new();
    backend.push_heartbeat(Err(igate_gateway::BackendError::Auth));

    let config = GatewayConfigBuilder::new().build();
    let (gateway, handle) = Gateway::new(
        config,
        transport,
        MockIo::new(),
        backend.clone(),
        Arc::clone(&store),
    );
    let mut events = handle.subscribe();
    let task = tokio::spawn(gateway.run());

    let mut saw_error_log = false;
    for _ in 0..32 {
        let Some(event) = next_event(&mut events).await else {
            break;
        };
        if let GatewayEvent::Log { level, message } = event {
            if level == igate_gateway::LogLevel::Error && message.contains("rejected") {
                saw_error_log = true;
                break;
            }
        }
    }
    assert!(saw_error_log, "auth failure was not surfaced");

    // The stored key is gone and the heartbeat loop is terminal.
    assert!(store.get("meta", "api_key").await.unwrap().is_none());
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(backend.heartbeat_calls(), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}
