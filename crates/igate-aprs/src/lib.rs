//! APRS-IS client for the igate gateway
//!
//! Two halves:
//!
//! - [`codec`] - pure frame encoding: position/status/message payloads,
//!   telemetry definition and data lines, coordinate formatting and the
//!   callsign passcode fold. No I/O anywhere.
//! - [`session`] - the login/keepalive/reconnect state machine over a
//!   pluggable socket ([`io::AprsIo`]), with deadline-based timers driven
//!   by the owner's tick.

pub mod codec;
pub mod error;
pub mod io;
pub mod session;
pub mod test_utils;

pub use codec::{
    frame_line, message_payload, mps_to_knots, passcode, position_payload, status_payload,
    telemetry_data, telemetry_definitions, Symbol, TELEMETRY_SEQ_MAX,
};
pub use error::{AprsError, Result};
pub use io::{AprsIo, TcpLineIo};
pub use session::{
    AprsSession, LoginIdentity, SessionConfig, SessionEvent, SessionState, DEFAULT_KEEPALIVE,
    RECONNECT_DELAY,
};
pub use test_utils::MockIo;
