//! Gateway orchestrator
//!
//! The top of the stack: one task owning every mutable cache, wired as a
//! `select!` loop over the device byte stream, the APRS-IS socket, a
//! one-second driver tick, the backend heartbeat interval and the command
//! channel. Mesh packets flow strictly in arrival order; timer-driven
//! transmissions serialize against the same loop, so no beacon and no
//! provisioning mutation can interleave mid-update.
//!
//! Nothing in here crashes on error. Transport faults schedule reconnects,
//! decode faults are logged per packet, backend transients degrade to the
//! cached provisioning, and persistence faults are logged and retried on
//! the next mutation.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use igate_aprs::{
    codec, AprsIo, AprsSession, LoginIdentity, SessionEvent, SessionState, TELEMETRY_SEQ_MAX,
};
use igate_mesh::{
    InterpreterConfig, LinkStat, MeshEvent, MeshInterpreter, MeshSummary, NodeId, NodeRegistry,
    PositionReport, RelayLinkStats, SummaryPayload,
};
use igate_proto::{heartbeat_packet, want_config_packet, FrameDecoder, MeshTransport, ProtoError};
use igate_state::RecordStore;

use crate::backend::{BackendError, ProvisioningBackend};
use crate::config::{GatewayConfig, SOFTWARE_NAME};
use crate::digest::{position_digest, sanitize_comment, PositionDigestCache};
use crate::error::{GatewayError, Result};
use crate::events::{AprsUplink, ConnectionStatus, GatewayEvent, LogLevel, StateSnapshot};
use crate::provision::{content_hash, MappingEntry, ProvisioningRecord};
use crate::schedule::ActionSchedule;
use crate::telemetry::TelemetryBuckets;

/// Destination callsign identifying this software's uplinks
pub const PRODUCT_DESTINATION: &str = "APZIGT";

/// Path alias for internet-only injection
const PATH_TCPIP: &str = "TCPIP*";

/// q-construct marking third-party traffic gated by a verified station
const Q_CONSTRUCT: &str = "qAR";

/// Delay before a mesh device reconnect attempt
const DEVICE_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval of the keep-alive packet sent to the mesh device
const DEVICE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

/// Minimum spacing of link-statistics persistence writes
const STATS_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Cadence of the driver tick
const DRIVER_TICK: Duration = Duration::from_secs(1);

/// Event broadcast capacity; lagging subscribers lose old events
const EVENT_CAPACITY: usize = 256;

/// Command channel capacity
const COMMAND_CAPACITY: usize = 32;

// Persistence collections and keys
const COLL_PROVISIONING: &str = "provisioning";
const KEY_CURRENT: &str = "current";
const COLL_MAPPINGS: &str = "mappings";
const COLL_RELAY_STATS: &str = "relay_stats";
const COLL_TELEMETRY_LOG: &str = "telemetry_log";
const COLL_META: &str = "meta";
const KEY_MAPPING_HASH: &str = "mapping_hash";
const KEY_MAPPING_SYNCED_AT: &str = "mapping_synced_at";
const KEY_TELEMETRY_SEQ: &str = "telemetry_seq";
const KEY_API_KEY: &str = "api_key";

/// Commands the gateway task accepts
#[derive(Debug)]
pub enum GatewayCommand {
    /// Assemble and return a state snapshot
    Snapshot(oneshot::Sender<StateSnapshot>),
    /// Operator reset of the node registry
    ResetRegistry,
    /// Force an immediate self beacon at the next tick
    SendBeacon,
    /// Stop the gateway task
    Shutdown,
}

/// Handle for controlling a running gateway
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    command_tx: mpsc::Sender<GatewayCommand>,
    event_tx: broadcast::Sender<GatewayEvent>,
}

impl GatewayHandle {
    /// Subscribe to the gateway event stream
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.event_tx.subscribe()
    }

    /// Request a state snapshot
    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(GatewayCommand::Snapshot(tx))
            .await
            .map_err(|_| GatewayError::ChannelClosed)?;
        rx.await.map_err(|_| GatewayError::ChannelClosed)
    }

    /// Operator reset of the node registry
    pub async fn reset_registry(&self) -> Result<()> {
        self.command_tx
            .send(GatewayCommand::ResetRegistry)
            .await
            .map_err(|_| GatewayError::ChannelClosed)
    }

    /// Force an immediate self beacon
    pub async fn send_beacon(&self) -> Result<()> {
        self.command_tx
            .send(GatewayCommand::SendBeacon)
            .await
            .map_err(|_| GatewayError::ChannelClosed)
    }

    /// Stop the gateway task
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(GatewayCommand::Shutdown)
            .await
            .map_err(|_| GatewayError::ChannelClosed)
    }
}

/// One queued uplink line awaiting a connected session
#[derive(Debug, Clone)]
struct PendingUplink {
    line: String,
    mesh_id: String,
    digest: String,
    flow_id: String,
}

/// The gateway orchestrator task
pub struct Gateway<T: MeshTransport, A: AprsIo, B: ProvisioningBackend> {
    config: GatewayConfig,
    transport: T,
    decoder: FrameDecoder,
    interpreter: MeshInterpreter,
    session: AprsSession<A>,
    backend: B,
    store: Arc<dyn RecordStore>,

    provisioning: Option<ProvisioningRecord>,
    provisioning_hash: Option<String>,
    mappings: HashMap<String, MappingEntry>,
    mapping_hash: Option<String>,
    mapping_synced: bool,

    backend_verified: bool,
    backend_degraded: bool,
    heartbeat_stopped: bool,
    last_heartbeat: Option<DateTime<Utc>>,

    beacon: ActionSchedule,
    telemetry_defs: ActionSchedule,
    telemetry_data: ActionSchedule,
    status_sent_this_session: bool,
    last_beacon: Option<DateTime<Utc>>,

    telemetry: TelemetryBuckets,
    telemetry_seq: u32,
    digests: PositionDigestCache,
    outbound: VecDeque<PendingUplink>,
    missing_mapping_logged: HashSet<String>,

    device_connected: bool,
    device_reconnect_at: Option<Instant>,
    device_heartbeat_at: Option<Instant>,

    stats_dirty: bool,
    stats_persisted_at: Option<Instant>,

    event_tx: broadcast::Sender<GatewayEvent>,
    command_rx: mpsc::Receiver<GatewayCommand>,
    running: bool,
}

impl<T, A, B> Gateway<T, A, B>
where
    T: MeshTransport,
    A: AprsIo,
    B: ProvisioningBackend,
{
    /// Create a gateway over the given transport, APRS socket, backend and
    /// store
    pub fn new(
        config: GatewayConfig,
        transport: T,
        aprs_io: A,
        backend: B,
        store: Arc<dyn RecordStore>,
    ) -> (Self, GatewayHandle) {
        let session = AprsSession::new(aprs_io, config.session_config());
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = GatewayHandle {
            command_tx,
            event_tx: event_tx.clone(),
        };

        let beacon = ActionSchedule::new(config.clamped_beacon_interval());
        let telemetry_defs = ActionSchedule::new(config.telemetry_definition_interval);
        let telemetry_data = ActionSchedule::new(config.telemetry_data_interval);
        let digests = PositionDigestCache::new(config.digest_cache_size, config.position_dedup_window);

        let gateway = Self {
            interpreter: MeshInterpreter::new(InterpreterConfig::default()),
            decoder: FrameDecoder::new(),
            transport,
            session,
            backend,
            store,
            provisioning: None,
            provisioning_hash: None,
            mappings: HashMap::new(),
            mapping_hash: None,
            mapping_synced: false,
            backend_verified: false,
            backend_degraded: false,
            heartbeat_stopped: false,
            last_heartbeat: None,
            beacon,
            telemetry_defs,
            telemetry_data,
            status_sent_this_session: false,
            last_beacon: None,
            telemetry: TelemetryBuckets::new(),
            telemetry_seq: 0,
            digests,
            outbound: VecDeque::new(),
            missing_mapping_logged: HashSet::new(),
            device_connected: false,
            device_reconnect_at: None,
            device_heartbeat_at: None,
            stats_dirty: false,
            stats_persisted_at: None,
            event_tx,
            command_rx,
            running: false,
            config,
        };
        (gateway, handle)
    }

    /// Run the gateway until shutdown
    pub async fn run(mut self) -> Result<()> {
        info!(device = %self.config.device, "Starting gateway");
        self.load_state().await;
        self.connect_device(Instant::now(), Utc::now()).await;
        self.heartbeat_once(Utc::now()).await;

        let mut driver = tokio::time::interval(DRIVER_TICK);
        driver.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut read_buf: Vec<u8> = Vec::with_capacity(2048);

        self.running = true;
        while self.running {
            tokio::select! {
                _ = driver.tick() => {
                    self.driver_tick(Instant::now(), Utc::now()).await;
                }

                _ = heartbeat.tick(), if !self.heartbeat_stopped => {
                    self.heartbeat_once(Utc::now()).await;
                }

                result = self.transport.read_bytes(&mut read_buf), if self.device_connected => {
                    match result {
                        Ok(0) => {}
                        Ok(_) => {
                            let frames = self.decoder.push(&read_buf);
                            read_buf.clear();
                            let now_i = Instant::now();
                            let now_u = Utc::now();
                            for frame in frames {
                                self.handle_device_payload(&frame, now_i, now_u).await;
                            }
                        }
                        Err(e) => self.on_device_fault(e, Instant::now()).await,
                    }
                }

                result = self.session.read(), if self.session.is_connected() => {
                    match result {
                        Ok(Some(chunk)) => {
                            let events = self.session.handle_input(&chunk);
                            let now_i = Instant::now();
                            let now_u = Utc::now();
                            for event in events {
                                self.handle_session_event(event, now_i, now_u).await;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            debug!(error = %e, "APRS-IS read fault");
                            let event = self.session.on_link_lost(Instant::now());
                            self.handle_session_event(event, Instant::now(), Utc::now()).await;
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, Instant::now(), Utc::now()).await,
                        None => break,
                    }
                }
            }
        }

        self.shutdown_cleanup().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Startup and persistence

    /// Load persisted caches: provisioning, mapping table, telemetry
    /// sequence and relay-link statistics.
    async fn load_state(&mut self) {
        match self.store.list(COLL_RELAY_STATS).await {
            Ok(entries) => {
                let mut stats = Vec::new();
                for (key, value) in entries {
                    if let (Ok(id), Ok(stat)) = (
                        NodeId::parse(&key),
                        serde_json::from_value::<LinkStat>(value),
                    ) {
                        stats.push((id, stat));
                    }
                }
                if !stats.is_empty() {
                    info!(entries = stats.len(), "Restored relay link statistics");
                    self.interpreter = MeshInterpreter::with_state(
                        InterpreterConfig::default(),
                        NodeRegistry::new(),
                        RelayLinkStats::from_entries(stats),
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to load relay link statistics"),
        }

        match self.store.list(COLL_MAPPINGS).await {
            Ok(entries) => {
                for (key, value) in entries {
                    if let Ok(entry) = serde_json::from_value::<MappingEntry>(value) {
                        self.mappings.insert(key, entry);
                    }
                }
                if !self.mappings.is_empty() {
                    info!(entries = self.mappings.len(), "Restored mapping table");
                }
            }
            Err(e) => warn!(error = %e, "Failed to load mapping table"),
        }
        if let Ok(Some(value)) = self.store.get(COLL_META, KEY_MAPPING_HASH).await {
            self.mapping_hash = value.as_str().map(String::from);
            self.mapping_synced = self.mapping_hash.is_some();
        }

        if let Ok(Some(value)) = self.store.get(COLL_META, KEY_TELEMETRY_SEQ).await {
            self.telemetry_seq = value.as_u64().unwrap_or(0) as u32 % (TELEMETRY_SEQ_MAX + 1);
        }

        if let Some(cached) = self.load_cached_provisioning().await {
            self.apply_provisioning(cached, false, Instant::now()).await;
        }
    }

    async fn load_cached_provisioning(&self) -> Option<ProvisioningRecord> {
        match self.store.get(COLL_PROVISIONING, KEY_CURRENT).await {
            Ok(Some(value)) => serde_json::from_value(value).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load cached provisioning");
                None
            }
        }
    }

    async fn persist_link_stats(&mut self) {
        let entries: Vec<(String, Value)> = self
            .interpreter
            .link_stats()
            .entries()
            .into_iter()
            .filter_map(|(id, stat)| {
                serde_json::to_value(stat).ok().map(|v| (id.mesh_id(), v))
            })
            .collect();
        match self.store.replace_all(COLL_RELAY_STATS, entries).await {
            Ok(()) => self.stats_dirty = false,
            // Retried on the next dirty tick, never blocks the hot path.
            Err(e) => warn!(error = %e, "Failed to persist link statistics"),
        }
    }

    // ------------------------------------------------------------------
    // Mesh device side

    async fn connect_device(&mut self, now_i: Instant, now_u: DateTime<Utc>) {
        match self.transport.connect().await {
            Ok(()) => {
                self.decoder.reset();
                self.interpreter.mark_connected(now_u);
                self.device_connected = true;
                self.device_heartbeat_at = Some(now_i + DEVICE_HEARTBEAT_INTERVAL);
                match want_config_packet(rand::random()) {
                    Ok(packet) => {
                        if let Err(e) = self.transport.write_all(&packet).await {
                            self.on_device_fault(e, now_i).await;
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to build want-config packet"),
                }
                self.log(LogLevel::Info, format!("Mesh device connected ({})", self.transport.name()));
                self.emit_status();
            }
            Err(e) => {
                debug!(error = %e, "Device connect failed");
                self.device_reconnect_at = Some(now_i + DEVICE_RECONNECT_DELAY);
            }
        }
    }

    async fn on_device_fault(&mut self, error: ProtoError, now_i: Instant) {
        self.device_connected = false;
        self.device_heartbeat_at = None;
        self.decoder.reset();
        self.transport.disconnect().await.ok();
        self.device_reconnect_at = Some(now_i + DEVICE_RECONNECT_DELAY);
        self.log(
            LogLevel::Warning,
            format!(
                "Mesh device fault: {}; reconnecting in {}s",
                error,
                DEVICE_RECONNECT_DELAY.as_secs()
            ),
        );
        self.emit_status();
    }

    async fn handle_device_payload(
        &mut self,
        payload: &[u8],
        now_i: Instant,
        now_u: DateTime<Utc>,
    ) {
        match self.interpreter.handle_frame(payload, now_u) {
            Ok(events) => {
                for event in events {
                    match event {
                        MeshEvent::Summary(summary) => {
                            self.process_summary(summary, now_i, now_u).await;
                        }
                        MeshEvent::NodeUpdated(record) => {
                            self.emit(GatewayEvent::NodeUpdate(Box::new(record)));
                        }
                        MeshEvent::MyInfo(id) => {
                            info!(node = %id, "Device reported its node number");
                        }
                        MeshEvent::ConfigComplete(nonce) => {
                            debug!(nonce, "Device config stream complete");
                        }
                        MeshEvent::Rebooted => {
                            self.log(LogLevel::Warning, "Mesh device rebooted".to_string());
                        }
                    }
                }
            }
            // Per-packet fault; the stream continues.
            Err(e) => debug!(error = %e, "Undecodable device frame"),
        }
    }

    async fn process_summary(
        &mut self,
        summary: MeshSummary,
        now_i: Instant,
        now_u: DateTime<Utc>,
    ) {
        let from_self = self.interpreter.self_node() == Some(summary.from.id);
        if !from_self {
            self.telemetry
                .count_packet(summary.port.counter_class(), now_u);
            self.emit(GatewayEvent::TelemetryUpdate(
                self.telemetry.window_sum(now_u, self.telemetry_window()),
            ));
        }
        self.stats_dirty = true;
        trace!(flow = %summary.flow_id, port = %summary.port, "Mesh summary");
        self.emit(GatewayEvent::MeshSummary(Box::new(summary.clone())));

        if !from_self {
            if let SummaryPayload::Position(report) = &summary.payload {
                let report = report.clone();
                self.forward_position(&summary, &report, now_i, now_u).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Position forwarding

    async fn forward_position(
        &mut self,
        summary: &MeshSummary,
        report: &PositionReport,
        now_i: Instant,
        now_u: DateTime<Utc>,
    ) {
        let mesh_id = summary.from.id.mesh_id();
        let Some(mapping) = self.mappings.get(&mesh_id).cloned() else {
            // Logged once per id; an unmapped node beacons constantly.
            if self.missing_mapping_logged.insert(mesh_id.clone()) {
                debug!(mesh_id, "No mapping for node, positions not forwarded");
            }
            return;
        };

        let Some(own_callsign) = self.session.identity().map(|i| i.callsign.clone()) else {
            return;
        };

        let callsign = mapping.aprs_callsign();
        let symbol = mapping
            .symbol()
            .or_else(|| self.provisioning.as_ref().map(|p| p.symbol()))
            .unwrap_or_default();
        let comment = sanitize_comment(mapping.comment.as_deref().unwrap_or(""));
        let speed_knots = report.speed_mps.map(codec::mps_to_knots);
        let altitude = report.altitude.map(f64::from);

        let digest = position_digest(
            &callsign,
            symbol,
            report.latitude,
            report.longitude,
            report.course,
            speed_knots,
            altitude,
            &comment,
        );
        if self.digests.is_duplicate(&mesh_id, &digest, now_u) {
            trace!(mesh_id, "Position unchanged inside dedup window");
            return;
        }

        let payload = codec::position_payload(
            report.latitude,
            report.longitude,
            symbol,
            report.course,
            speed_knots,
            altitude,
            None,
            &spaced_comment(&comment),
        );
        let line = codec::frame_line(
            &callsign,
            PRODUCT_DESTINATION,
            &[PATH_TCPIP, Q_CONSTRUCT, own_callsign.as_str()],
            &payload,
        );

        self.enqueue_uplink(PendingUplink {
            line,
            mesh_id,
            digest,
            flow_id: summary.flow_id.clone(),
        });
        self.flush_outbound(now_i, now_u).await;
    }

    fn enqueue_uplink(&mut self, uplink: PendingUplink) {
        if self.outbound.len() >= self.config.outbound_queue_size {
            if let Some(dropped) = self.outbound.pop_front() {
                warn!(line = %dropped.line, "Outbound queue full, dropping oldest uplink");
            }
        }
        self.outbound.push_back(uplink);
    }

    async fn flush_outbound(&mut self, now_i: Instant, now_u: DateTime<Utc>) {
        if !self.session.is_verified() {
            return;
        }
        while let Some(uplink) = self.outbound.pop_front() {
            match self.session.send_line(&uplink.line, now_i).await {
                Ok(()) => {
                    self.telemetry.count_forwarded(now_u);
                    self.digests.record(&uplink.mesh_id, uplink.digest, now_u);
                    info!(line = %uplink.line, "Forwarded position to APRS-IS");
                    self.emit(GatewayEvent::AprsUplink(AprsUplink {
                        line: uplink.line,
                        flow_id: Some(uplink.flow_id),
                    }));
                }
                Err(e) => {
                    // Back in front; retried at the next tick.
                    debug!(error = %e, "Uplink send failed, keeping queued");
                    self.outbound.push_front(uplink);
                    self.emit_status();
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Backend heartbeat and provisioning

    async fn heartbeat_once(&mut self, now_u: DateTime<Utc>) {
        if self.heartbeat_stopped {
            return;
        }
        let local_hash = self.mapping_hash.clone();
        match self
            .backend
            .heartbeat(local_hash.as_deref(), &self.config.agent)
            .await
        {
            Ok(response) => {
                self.last_heartbeat = Some(now_u);
                self.backend_verified = true;
                self.backend_degraded = false;
                if let Some(provision) = response.provision {
                    self.apply_provisioning(provision, true, Instant::now()).await;
                }
                if response.needs_update || !self.mapping_synced {
                    self.refresh_mappings(now_u).await;
                }
            }
            Err(BackendError::Auth) => self.on_backend_auth_failure().await,
            Err(BackendError::Transient(reason)) => {
                // Prior verified state survives; the station keeps beaconing
                // with the cached identity.
                self.backend_degraded = true;
                self.log(
                    LogLevel::Warning,
                    format!("Backend heartbeat failed: {}", reason),
                );
                if self.provisioning.is_none() {
                    if let Some(cached) = self.load_cached_provisioning().await {
                        self.apply_provisioning(cached, false, Instant::now()).await;
                    }
                }
            }
        }
        self.emit_status();
    }

    async fn refresh_mappings(&mut self, now_u: DateTime<Utc>) {
        match self.backend.fetch_mappings(self.mapping_hash.as_deref()).await {
            Ok(response) => {
                let entries: Vec<(String, Value)> = response
                    .items
                    .iter()
                    .filter_map(|entry| {
                        serde_json::to_value(entry)
                            .ok()
                            .map(|v| (entry.mesh_id.clone(), v))
                    })
                    .collect();
                if let Err(e) = self.store.replace_all(COLL_MAPPINGS, entries).await {
                    warn!(error = %e, "Failed to persist mapping table");
                }
                if let Err(e) = self
                    .store
                    .set(COLL_META, KEY_MAPPING_HASH, json!(response.hash))
                    .await
                {
                    warn!(error = %e, "Failed to persist mapping hash");
                }
                if let Err(e) = self
                    .store
                    .set(COLL_META, KEY_MAPPING_SYNCED_AT, json!(now_u))
                    .await
                {
                    warn!(error = %e, "Failed to persist mapping sync time");
                }

                self.mappings = response
                    .items
                    .into_iter()
                    .map(|entry| (entry.mesh_id.clone(), entry))
                    .collect();
                self.mapping_hash = Some(response.hash);
                self.mapping_synced = true;
                self.missing_mapping_logged.clear();
                self.log(
                    LogLevel::Info,
                    format!("Mapping table refreshed ({} entries)", self.mappings.len()),
                );
            }
            Err(BackendError::Auth) => self.on_backend_auth_failure().await,
            Err(BackendError::Transient(reason)) => {
                self.backend_degraded = true;
                self.log(
                    LogLevel::Warning,
                    format!("Mapping fetch failed: {}", reason),
                );
            }
        }
    }

    async fn on_backend_auth_failure(&mut self) {
        self.heartbeat_stopped = true;
        self.backend_verified = false;
        self.config.api_key = None;
        if let Err(e) = self.store.delete(COLL_META, KEY_API_KEY).await {
            warn!(error = %e, "Failed to clear stored API key");
        }
        self.log(
            LogLevel::Error,
            "Backend rejected the API key; heartbeats stopped until re-provisioned".to_string(),
        );
    }

    /// Apply a provisioning record, detecting no-ops by content hash.
    ///
    /// A callsign change tears the APRS session down and reconnects with the
    /// new identity; any other change just forces a beacon refresh.
    async fn apply_provisioning(
        &mut self,
        record: ProvisioningRecord,
        persist: bool,
        now_i: Instant,
    ) -> bool {
        let hash = content_hash(&record);
        if self.provisioning_hash.as_deref() == Some(hash.as_str()) {
            trace!("Provisioning unchanged");
            return false;
        }

        if persist {
            match serde_json::to_value(&record) {
                Ok(value) => {
                    if let Err(e) = self.store.set(COLL_PROVISIONING, KEY_CURRENT, value).await {
                        warn!(error = %e, "Failed to persist provisioning");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize provisioning"),
            }
        }

        let callsign = record.aprs_callsign();
        let passcode = codec::passcode(&record.callsign);
        let previous = self.session.identity().map(|i| i.callsign.clone());
        self.session.set_identity(LoginIdentity {
            callsign: callsign.clone(),
            passcode,
        });
        self.provisioning = Some(record);
        self.provisioning_hash = Some(hash);
        self.log(
            LogLevel::Info,
            format!("Provisioning applied; station callsign {}", callsign),
        );

        if previous.as_deref() != Some(callsign.as_str()) {
            if self.session.is_connected() {
                self.session.shutdown().await;
            }
            self.status_sent_this_session = false;
            if let Err(e) = self.session.connect(now_i).await {
                // The session scheduled its own retry.
                debug!(error = %e, "APRS-IS connect failed, retry scheduled");
            }
        } else if self.session.is_verified() {
            self.beacon.force();
        }
        true
    }

    // ------------------------------------------------------------------
    // Driver tick and scheduled transmissions

    async fn driver_tick(&mut self, now_i: Instant, now_u: DateTime<Utc>) {
        if !self.device_connected && self.device_reconnect_at.is_some_and(|at| now_i >= at) {
            self.device_reconnect_at = None;
            self.connect_device(now_i, now_u).await;
        }

        if self.device_connected && self.device_heartbeat_at.is_some_and(|at| now_i >= at) {
            self.device_heartbeat_at = Some(now_i + DEVICE_HEARTBEAT_INTERVAL);
            if let Ok(packet) = heartbeat_packet() {
                if let Err(e) = self.transport.write_all(&packet).await {
                    self.on_device_fault(e, now_i).await;
                }
            }
        }

        let events = self.session.tick(now_i).await;
        for event in events {
            self.handle_session_event(event, now_i, now_u).await;
        }

        if self.session.is_verified() {
            self.attempt_scheduled_sends(now_i, now_u).await;
        }
        self.flush_outbound(now_i, now_u).await;

        if self.stats_dirty
            && self
                .stats_persisted_at
                .is_none_or(|at| now_i.duration_since(at) >= STATS_PERSIST_INTERVAL)
        {
            self.persist_link_stats().await;
            self.stats_persisted_at = Some(now_i);
        }

        self.telemetry
            .prune(now_u, self.telemetry_window() * 2);
    }

    async fn handle_session_event(
        &mut self,
        event: SessionEvent,
        now_i: Instant,
        now_u: DateTime<Utc>,
    ) {
        match event {
            SessionEvent::Connected => {
                self.status_sent_this_session = false;
                self.emit_status();
            }
            SessionEvent::Verified => {
                self.log(LogLevel::Info, "APRS-IS login verified".to_string());
                self.emit_status();
                self.attempt_scheduled_sends(now_i, now_u).await;
                self.flush_outbound(now_i, now_u).await;
                let snapshot = self.snapshot(now_u);
                self.emit(GatewayEvent::StateSnapshot(Box::new(snapshot)));
            }
            SessionEvent::ServerIdentity(name) => {
                debug!(server = %name, "APRS-IS server identified");
                self.emit_status();
            }
            SessionEvent::Disconnected { reconnect_in } => {
                self.log(
                    LogLevel::Warning,
                    format!(
                        "APRS-IS disconnected; reconnecting in {}s",
                        reconnect_in.as_secs()
                    ),
                );
                self.emit_status();
            }
        }
    }

    /// Fire every due schedule. A failed send leaves its schedule due, so
    /// the next tick retries it naturally.
    async fn attempt_scheduled_sends(&mut self, now_i: Instant, now_u: DateTime<Utc>) {
        if !self.session.is_verified() {
            return;
        }

        if self.beacon.due(now_i) && self.send_self_beacon(now_i).await {
            self.beacon.sent(now_i);
            self.last_beacon = Some(now_u);
        }

        if !self.status_sent_this_session && self.send_status(now_i).await {
            self.status_sent_this_session = true;
        }

        if self.telemetry_defs.due(now_i) && self.send_telemetry_definitions(now_i).await {
            self.telemetry_defs.sent(now_i);
        }

        if self.telemetry_data.due(now_i) && self.send_telemetry_data(now_i, now_u).await {
            self.telemetry_data.sent(now_i);
        }
    }

    async fn send_self_beacon(&mut self, now_i: Instant) -> bool {
        let Some(provisioning) = self.provisioning.clone() else {
            return false;
        };
        let Some((latitude, longitude)) = provisioning.position() else {
            trace!("No station position provisioned, beacon skipped");
            return false;
        };
        let Some(callsign) = self.session.identity().map(|i| i.callsign.clone()) else {
            return false;
        };

        let comment = sanitize_comment(provisioning.comment.as_deref().unwrap_or(""));
        let payload = codec::position_payload(
            latitude,
            longitude,
            provisioning.symbol(),
            None,
            None,
            provisioning.altitude,
            provisioning.phg.as_deref(),
            &spaced_comment(&comment),
        );
        let line = codec::frame_line(&callsign, PRODUCT_DESTINATION, &[PATH_TCPIP], &payload);
        self.send_uplink(&line, now_i, "Self beacon sent").await
    }

    async fn send_status(&mut self, now_i: Instant) -> bool {
        let Some(callsign) = self.session.identity().map(|i| i.callsign.clone()) else {
            return false;
        };
        let payload = codec::status_payload(&format!(
            "{} {}",
            SOFTWARE_NAME,
            env!("CARGO_PKG_VERSION")
        ));
        let line = codec::frame_line(&callsign, PRODUCT_DESTINATION, &[PATH_TCPIP], &payload);
        self.send_uplink(&line, now_i, "Status sent").await
    }

    async fn send_telemetry_definitions(&mut self, now_i: Instant) -> bool {
        let Some(callsign) = self.session.identity().map(|i| i.callsign.clone()) else {
            return false;
        };
        for payload in codec::telemetry_definitions(&callsign) {
            let line = codec::frame_line(&callsign, PRODUCT_DESTINATION, &[PATH_TCPIP], &payload);
            if !self.send_uplink(&line, now_i, "Telemetry definition sent").await {
                return false;
            }
        }
        true
    }

    async fn send_telemetry_data(&mut self, now_i: Instant, now_u: DateTime<Utc>) -> bool {
        let Some(callsign) = self.session.identity().map(|i| i.callsign.clone()) else {
            return false;
        };
        let counts = self.telemetry.window_sum(now_u, self.telemetry_window());
        let payload = codec::telemetry_data(self.telemetry_seq, counts.as_fields());
        let line = codec::frame_line(&callsign, PRODUCT_DESTINATION, &[PATH_TCPIP], &payload);
        if !self.send_uplink(&line, now_i, "Telemetry data sent").await {
            return false;
        }

        let sent_seq = self.telemetry_seq;
        self.telemetry_seq = (self.telemetry_seq + 1) % (TELEMETRY_SEQ_MAX + 1);
        if let Err(e) = self
            .store
            .set(COLL_META, KEY_TELEMETRY_SEQ, json!(self.telemetry_seq))
            .await
        {
            warn!(error = %e, "Failed to persist telemetry sequence");
        }
        let record = json!({
            "time": now_u,
            "sequence": sent_seq,
            "counts": counts,
        });
        if let Err(e) = self.store.append(COLL_TELEMETRY_LOG, record).await {
            warn!(error = %e, "Failed to append telemetry record");
        }
        self.emit(GatewayEvent::TelemetryUpdate(counts));
        true
    }

    async fn send_uplink(&mut self, line: &str, now_i: Instant, what: &str) -> bool {
        match self.session.send_line(line, now_i).await {
            Ok(()) => {
                info!(line, "{}", what);
                self.emit(GatewayEvent::AprsUplink(AprsUplink {
                    line: line.to_string(),
                    flow_id: None,
                }));
                true
            }
            Err(e) => {
                debug!(error = %e, line, "Uplink send failed, will retry");
                self.emit_status();
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands, events, snapshots

    async fn handle_command(
        &mut self,
        command: GatewayCommand,
        _now_i: Instant,
        now_u: DateTime<Utc>,
    ) {
        match command {
            GatewayCommand::Snapshot(reply) => {
                let snapshot = self.snapshot(now_u);
                self.emit(GatewayEvent::StateSnapshot(Box::new(snapshot.clone())));
                let _ = reply.send(snapshot);
            }
            GatewayCommand::ResetRegistry => {
                self.interpreter.reset_registry();
                self.log(LogLevel::Info, "Node registry reset".to_string());
            }
            GatewayCommand::SendBeacon => {
                self.beacon.force();
            }
            GatewayCommand::Shutdown => {
                info!("Gateway shutdown requested");
                self.running = false;
            }
        }
    }

    fn snapshot(&self, now_u: DateTime<Utc>) -> StateSnapshot {
        StateSnapshot {
            device_connected: self.device_connected,
            aprs_state: self.session.state().to_string(),
            aprs_callsign: self.session.identity().map(|i| i.callsign.clone()),
            aprs_server: self.session.actual_server().map(String::from),
            backend_verified: self.backend_verified,
            backend_degraded: self.backend_degraded,
            last_heartbeat: self.last_heartbeat,
            last_beacon: self.last_beacon,
            node_count: self.interpreter.registry().len(),
            link_stat_count: self.interpreter.link_stats().len(),
            mapping_count: self.mappings.len(),
            queue_depth: self.outbound.len(),
            backlog_dropped: self.interpreter.backlog_dropped(),
            telemetry: self.telemetry.window_sum(now_u, self.telemetry_window()),
        }
    }

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            device_connected: self.device_connected,
            aprs_state: self.session.state().to_string(),
            aprs_server: self.session.actual_server().map(String::from),
            backend_verified: self.backend_verified,
            backend_degraded: self.backend_degraded,
        }
    }

    fn emit_status(&self) {
        self.emit(GatewayEvent::ConnectionStatus(self.connection_status()));
    }

    fn emit(&self, event: GatewayEvent) {
        // Fire-and-forget; no subscriber is not an error.
        let _ = self.event_tx.send(event);
    }

    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.emit(GatewayEvent::Log { level, message });
    }

    fn telemetry_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.telemetry_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(10))
    }

    async fn shutdown_cleanup(&mut self) {
        self.session.shutdown().await;
        self.transport.disconnect().await.ok();
        self.persist_link_stats().await;
        if let Err(e) = self
            .store
            .set(COLL_META, KEY_TELEMETRY_SEQ, json!(self.telemetry_seq))
            .await
        {
            warn!(error = %e, "Failed to persist telemetry sequence");
        }
        info!("Gateway stopped");
    }

    /// Current session state, for diagnostics
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }
}

/// Prefix a non-empty comment with the conventional separating space
fn spaced_comment(comment: &str) -> String {
    if comment.is_empty() {
        String::new()
    } else {
        format!(" {}", comment)
    }
}
