//! APRS-IS session state machine
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected (login sent) ->
//! Verified`, and back to `Disconnected` on any socket fault. The session
//! owns its timers as deadlines checked by [`AprsSession::tick`], so a
//! teardown cancels every pending timer synchronously and a stale timer can
//! never fire against a replaced connection.
//!
//! Reconnection uses a single fixed delay with no backoff; APRS-IS servers
//! are load-balanced and practically always reachable, so one retry cadence
//! is enough.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{AprsError, Result};
use crate::io::AprsIo;

/// Default keepalive comment interval
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Fixed delay before a reconnect attempt
pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Fallback filter appended to the login when the operator set none; a
/// one-kilometer radius keeps the downlink essentially silent for an
/// uplink-only gateway.
pub const DEFAULT_FILTER: &str = "m/1";

/// Bounds for the one-shot keepalive kicker after connect
const KICKER_MIN: Duration = Duration::from_secs(5);
const KICKER_MAX: Duration = Duration::from_secs(20);

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Connected, login sent, not yet acknowledged
    Connected,
    /// Server acknowledged the login as verified
    Verified,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Verified => write!(f, "verified"),
        }
    }
}

/// Login identity derived from provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginIdentity {
    /// Full callsign including SSID (`BASE[-SSID]`)
    pub callsign: String,
    /// Passcode derived from the callsign base
    pub passcode: u16,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server address (host:port)
    pub server: String,
    /// Software name reported in the login line
    pub software: String,
    /// Software version reported in the login line
    pub version: String,
    /// Operator filter command, sent after login when set
    pub filter: Option<String>,
    /// Keepalive comment interval
    pub keepalive: Duration,
    /// Delay before reconnect attempts
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: "rotate.aprs2.net:14580".to_string(),
            software: "igate".to_string(),
            version: "0.0.0".to_string(),
            filter: None,
            keepalive: DEFAULT_KEEPALIVE,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Notifications the session surfaces to its driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection established and login sent
    Connected,
    /// Server acknowledged the login as verified
    Verified,
    /// The server identified itself
    ServerIdentity(String),
    /// Connection lost; a reconnect is scheduled after `reconnect_in`
    Disconnected {
        /// Delay until the scheduled reconnect attempt
        reconnect_in: Duration,
    },
}

/// APRS-IS session over a pluggable socket implementation
#[derive(Debug)]
pub struct AprsSession<T: AprsIo> {
    io: T,
    config: SessionConfig,
    identity: Option<LoginIdentity>,
    state: SessionState,
    line_buf: String,
    actual_server: Option<String>,
    kicker_at: Option<Instant>,
    keepalive_at: Option<Instant>,
    reconnect_at: Option<Instant>,
    lines_in: u64,
    lines_out: u64,
    reconnects: u64,
}

impl<T: AprsIo> AprsSession<T> {
    /// Create a session over `io`
    pub fn new(io: T, config: SessionConfig) -> Self {
        Self {
            io,
            config,
            identity: None,
            state: SessionState::Disconnected,
            line_buf: String::new(),
            actual_server: None,
            kicker_at: None,
            keepalive_at: None,
            reconnect_at: None,
            lines_in: 0,
            lines_out: 0,
            reconnects: 0,
        }
    }

    /// Set or replace the login identity. Takes effect at the next connect.
    pub fn set_identity(&mut self, identity: LoginIdentity) {
        self.identity = Some(identity);
    }

    /// Current login identity
    pub fn identity(&self) -> Option<&LoginIdentity> {
        self.identity.as_ref()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the login has been acknowledged
    pub fn is_verified(&self) -> bool {
        self.state == SessionState::Verified
    }

    /// Whether a line can currently be sent
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected | SessionState::Verified)
    }

    /// The server name reported by the peer, once known
    pub fn actual_server(&self) -> Option<&str> {
        self.actual_server.as_deref()
    }

    /// Lines received / sent since creation
    pub fn line_counts(&self) -> (u64, u64) {
        (self.lines_in, self.lines_out)
    }

    /// Connect and log in.
    ///
    /// On failure the session schedules one reconnect attempt after the
    /// configured fixed delay and returns the error.
    pub async fn connect(&mut self, now: Instant) -> Result<()> {
        let identity = self.identity.clone().ok_or(AprsError::NoIdentity)?;

        self.clear_timers();
        self.line_buf.clear();
        self.state = SessionState::Connecting;
        info!(server = %self.config.server, callsign = %identity.callsign, "Connecting to APRS-IS");

        if let Err(e) = self.io.connect(&self.config.server).await {
            warn!(error = %e, "APRS-IS connect failed");
            self.state = SessionState::Disconnected;
            self.reconnect_at = Some(now + self.config.reconnect_delay);
            return Err(e);
        }

        let mut login = format!(
            "user {} pass {} vers {} {}",
            identity.callsign, identity.passcode, self.config.software, self.config.version
        );
        if self.config.filter.is_none() {
            login.push_str(&format!(" filter {}", DEFAULT_FILTER));
        }
        self.write_raw(&login).await?;

        if let Some(filter) = self.config.filter.clone() {
            self.write_raw(&format!("#filter {}", filter)).await?;
        }

        self.state = SessionState::Connected;
        let half = self.config.keepalive / 2;
        self.kicker_at = Some(now + half.clamp(KICKER_MIN, KICKER_MAX));
        self.keepalive_at = Some(now + self.config.keepalive);
        Ok(())
    }

    /// Explicit teardown without scheduling a reconnect (reconfiguration,
    /// shutdown). Cancels every pending timer first.
    pub async fn shutdown(&mut self) {
        self.clear_timers();
        self.io.disconnect().await;
        self.state = SessionState::Disconnected;
        info!("APRS-IS session shut down");
    }

    /// Read from the socket. `Ok(None)` means no data before the timeout.
    /// Errors must be routed to [`AprsSession::on_link_lost`] by the driver.
    pub async fn read(&mut self) -> Result<Option<String>> {
        if !self.is_connected() {
            return Err(AprsError::NotConnected);
        }
        self.io.read_chunk().await
    }

    /// Feed received text into the line splitter and handle each complete
    /// line. Lines split on CRLF or bare LF; a trailing partial line is
    /// buffered for the next chunk.
    pub fn handle_input(&mut self, chunk: &str) -> Vec<SessionEvent> {
        self.line_buf.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }
            self.lines_in += 1;
            if let Some(event) = self.handle_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn handle_line(&mut self, line: &str) -> Option<SessionEvent> {
        if !line.starts_with('#') {
            // Downlink traffic; this gateway only uplinks, so it is noted
            // and dropped.
            debug!(line, "APRS-IS traffic line");
            return None;
        }

        debug!(line, "APRS-IS comment");
        if is_login_verified(line) {
            if self.state == SessionState::Connected {
                info!("APRS-IS login verified");
                self.state = SessionState::Verified;
            }
            if let Some(server) = parse_server_identity(line) {
                self.actual_server = Some(server.clone());
                return Some(SessionEvent::Verified);
            }
            return Some(SessionEvent::Verified);
        }

        if let Some(server) = parse_server_identity(line) {
            if self.actual_server.as_deref() != Some(server.as_str()) {
                self.actual_server = Some(server.clone());
                return Some(SessionEvent::ServerIdentity(server));
            }
        }
        None
    }

    /// Send one uplink line.
    ///
    /// Fails with [`AprsError::NotConnected`] when no connection is up;
    /// callers treat that as "retry at the next scheduled tick", never as
    /// fatal. A write fault tears the session down and schedules the
    /// reconnect itself.
    pub async fn send_line(&mut self, line: &str, now: Instant) -> Result<()> {
        if !self.is_connected() {
            return Err(AprsError::NotConnected);
        }
        match self.write_raw(line).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.on_link_lost(now);
                Err(e)
            }
        }
    }

    /// Handle a detected connection loss: clear all session timers, mark
    /// disconnected and schedule exactly one reconnect attempt.
    pub fn on_link_lost(&mut self, now: Instant) -> SessionEvent {
        warn!(
            reconnect_secs = self.config.reconnect_delay.as_secs(),
            "APRS-IS connection lost"
        );
        self.clear_timers();
        self.state = SessionState::Disconnected;
        self.reconnect_at = Some(now + self.config.reconnect_delay);
        SessionEvent::Disconnected {
            reconnect_in: self.config.reconnect_delay,
        }
    }

    /// Drive the session timers. Call at a steady cadence (once a second is
    /// plenty); due deadlines fire at most once.
    pub async fn tick(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if self.state == SessionState::Disconnected {
            if self.reconnect_at.is_some_and(|at| now >= at) {
                self.reconnect_at = None;
                self.reconnects += 1;
                match self.connect(now).await {
                    Ok(()) => events.push(SessionEvent::Connected),
                    Err(e) => {
                        debug!(error = %e, "Reconnect attempt failed");
                        events.push(SessionEvent::Disconnected {
                            reconnect_in: self.config.reconnect_delay,
                        });
                    }
                }
            }
            return events;
        }

        if self.kicker_at.is_some_and(|at| now >= at) {
            self.kicker_at = None;
            if let Err(e) = self.send_keepalive(now).await {
                debug!(error = %e, "Keepalive kicker failed");
                events.push(self.on_link_lost_event(now));
                return events;
            }
        }

        if self.keepalive_at.is_some_and(|at| now >= at) {
            self.keepalive_at = Some(now + self.config.keepalive);
            if let Err(e) = self.send_keepalive(now).await {
                debug!(error = %e, "Keepalive failed");
                events.push(self.on_link_lost_event(now));
            }
        }

        events
    }

    async fn send_keepalive(&mut self, _now: Instant) -> Result<()> {
        let line = format!("# {} {}", self.config.software, self.config.version);
        self.write_raw(&line).await
    }

    fn on_link_lost_event(&mut self, now: Instant) -> SessionEvent {
        // write_raw already dropped the socket; just normalize state
        self.on_link_lost(now)
    }

    async fn write_raw(&mut self, line: &str) -> Result<()> {
        self.io.write_line(line).await?;
        self.lines_out += 1;
        Ok(())
    }

    fn clear_timers(&mut self) {
        self.kicker_at = None;
        self.keepalive_at = None;
        self.reconnect_at = None;
    }

    /// Access the underlying socket
    pub fn io(&self) -> &T {
        &self.io
    }

    /// Mutable access to the underlying socket
    pub fn io_mut(&mut self) -> &mut T {
        &mut self.io
    }
}

/// Whether a comment line acknowledges the login as verified.
///
/// Word-exact match: `unverified` must not count.
fn is_login_verified(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("logresp")
        && lower
            .split([' ', ','])
            .any(|word| word == "verified")
}

/// Extract the server name from a comment line.
///
/// Handles `... server <name>` and the aprsc banner
/// `# aprsc <ver> <date> GMT <name> <addr>`.
fn parse_server_identity(line: &str) -> Option<String> {
    let words: Vec<&str> = line
        .split([' ', ','])
        .filter(|w| !w.is_empty())
        .collect();

    if let Some(pos) = words.iter().position(|w| w.eq_ignore_ascii_case("server")) {
        return words.get(pos + 1).map(|s| s.to_string());
    }

    if line.starts_with("# aprsc") {
        if let Some(pos) = words.iter().position(|w| *w == "GMT") {
            return words.get(pos + 1).map(|s| s.to_string());
        }
    }
    None
}
