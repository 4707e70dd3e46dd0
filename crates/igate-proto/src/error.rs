//! Error types for framing and device transport operations

use thiserror::Error;

/// Errors produced by the framing layer and device transports
#[derive(Error, Debug)]
pub enum ProtoError {
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Connection attempt failed
    #[error("Failed to connect to {target}: {reason}")]
    ConnectFailed {
        /// Connection target (address or port path)
        target: String,
        /// Failure reason
        reason: String,
    },

    /// Transport read error
    #[error("Transport read error: {0}")]
    ReadError(String),

    /// Transport write error
    #[error("Transport write error: {0}")]
    WriteError(String),

    /// Transport disconnected
    #[error("Transport disconnected")]
    Disconnected,

    /// Frame length field is zero or exceeds the configured maximum
    #[error("Frame length {length} out of range (max {max})")]
    FrameLength {
        /// Length read from the header
        length: usize,
        /// Configured maximum payload length
        max: usize,
    },

    /// Payload exceeds the frame format's 16-bit length field
    #[error("Payload too large to frame: {0} bytes")]
    PayloadTooLarge(usize),

    /// Protobuf decode error
    #[error("Protobuf decode error: {0}")]
    Decode(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtoError {
    /// Check if this error should trigger a reconnect
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ProtoError::Disconnected
                | ProtoError::ReadError(_)
                | ProtoError::WriteError(_)
                | ProtoError::ConnectFailed { .. }
                | ProtoError::Io(_)
        )
    }
}

/// Result type alias for framing and transport operations
pub type Result<T> = std::result::Result<T, ProtoError>;

impl From<prost::DecodeError> for ProtoError {
    fn from(err: prost::DecodeError) -> Self {
        ProtoError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(ProtoError::Disconnected.is_retriable());
        assert!(ProtoError::ReadError("reset".into()).is_retriable());
        assert!(!ProtoError::FrameLength { length: 0, max: 512 }.is_retriable());
        assert!(!ProtoError::Decode("bad varint".into()).is_retriable());
    }
}
