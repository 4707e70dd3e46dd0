//! Gateway orchestrator for the igate workspace
//!
//! Ties the lower crates together into one running service:
//!
//! - mesh frames in from [`igate_proto`], interpreted by [`igate_mesh`]
//! - provisioning identity and the device→callsign mapping table from the
//!   backend ([`backend`]), refreshed by a heartbeat loop
//! - positions forwarded to APRS-IS through [`igate_aprs`], deduplicated
//!   by a digest window ([`digest`])
//! - self beacon, status and telemetry on self-correcting schedules
//!   ([`schedule`], [`telemetry`])
//! - state persisted through [`igate_state`], events fanned out on a
//!   broadcast channel ([`events`])
//!
//! The orchestrator runs as a single task owning every mutable cache; see
//! [`gateway::Gateway`].

pub mod backend;
pub mod config;
pub mod digest;
pub mod error;
pub mod events;
pub mod gateway;
pub mod provision;
pub mod schedule;
pub mod telemetry;
pub mod test_utils;

pub use backend::{BackendError, HeartbeatResponse, HttpBackend, MappingsResponse, ProvisioningBackend};
pub use config::{GatewayConfig, GatewayConfigBuilder, SOFTWARE_NAME};
pub use digest::{position_digest, PositionDigestCache};
pub use error::{GatewayError, Result};
pub use events::{AprsUplink, ConnectionStatus, GatewayEvent, LogLevel, StateSnapshot};
pub use gateway::{Gateway, GatewayCommand, GatewayHandle, PRODUCT_DESTINATION};
pub use provision::{content_hash, MappingEntry, ProvisioningRecord};
pub use telemetry::{TelemetryBuckets, TelemetryCounts};
