//! Error types for the gateway orchestrator

use thiserror::Error;

use crate::backend::BackendError;

/// Errors produced by the gateway orchestrator
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Device protocol or transport fault
    #[error("Device error: {0}")]
    Device(#[from] igate_proto::ProtoError),

    /// Mesh interpretation fault
    #[error("Mesh error: {0}")]
    Mesh(#[from] igate_mesh::MeshError),

    /// APRS-IS session fault
    #[error("APRS error: {0}")]
    Aprs(#[from] igate_aprs::AprsError),

    /// Persistence fault
    #[error("State error: {0}")]
    State(#[from] igate_state::StateError),

    /// Backend provisioning fault
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The command channel to the gateway task is gone
    #[error("Gateway command channel closed")]
    ChannelClosed,
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
