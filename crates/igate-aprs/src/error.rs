//! Error types for APRS-IS operations

use thiserror::Error;

/// Errors produced by the APRS-IS session and transport
#[derive(Error, Debug)]
pub enum AprsError {
    /// Connection attempt failed
    #[error("Failed to connect to {server}: {reason}")]
    ConnectFailed {
        /// Server address
        server: String,
        /// Failure reason
        reason: String,
    },

    /// Not connected; the caller should retry at its next scheduled tick
    #[error("Not connected to APRS-IS")]
    NotConnected,

    /// Session has no login identity yet
    #[error("No callsign configured for APRS-IS login")]
    NoIdentity,

    /// Socket read error
    #[error("APRS-IS read error: {0}")]
    ReadError(String),

    /// Socket write error
    #[error("APRS-IS write error: {0}")]
    WriteError(String),

    /// Server closed the connection
    #[error("APRS-IS connection closed")]
    ConnectionClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for APRS operations
pub type Result<T> = std::result::Result<T, AprsError>;
