//! Error types for mesh packet interpretation

use thiserror::Error;

/// Errors produced while interpreting mesh traffic
#[derive(Error, Debug)]
pub enum MeshError {
    /// Protobuf decode error for a whole frame
    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    /// Protobuf decode error for an inner application payload
    #[error("Payload decode error on port {port}: {reason}")]
    PayloadDecode {
        /// Application port the payload arrived on
        port: i32,
        /// Decode failure reason
        reason: String,
    },

    /// A mesh id string did not match `!` + 8 hex digits
    #[error("Invalid mesh id: {0}")]
    InvalidMeshId(String),
}

/// Result type alias for mesh interpretation
pub type Result<T> = std::result::Result<T, MeshError>;

impl From<prost::DecodeError> for MeshError {
    fn from(err: prost::DecodeError) -> Self {
        MeshError::FrameDecode(err.to_string())
    }
}
