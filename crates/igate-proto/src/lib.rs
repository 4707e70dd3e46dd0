//! Mesh device protocol plumbing for the igate gateway
//!
//! This crate owns the lowest layer of the gateway: the length-framed byte
//! stream a mesh device speaks over TCP or serial, the protobuf message
//! subset carried inside those frames, and the transports that move the
//! bytes.
//!
//! # Protocol Details
//!
//! Devices frame every protobuf message as:
//! - Bytes 0-1: Magic number `0x94C3`
//! - Bytes 2-3: Payload length (big-endian u16)
//! - Bytes 4+: Protobuf payload
//!
//! The stream can carry garbage between frames (boot logs, noise); the
//! [`framing::FrameDecoder`] resynchronizes byte-by-byte and is invariant to
//! how input is chunked.
//!
//! # Features
//!
//! - `tcp` (default) - TCP transport for networked devices
//! - `serial` - serial port transport (requires `libudev-dev` on Linux)
//! - `full` - all transports

pub mod error;
pub mod framing;
pub mod proto;
pub mod transport;

pub use error::{ProtoError, Result};
pub use framing::{frame, FrameDecoder, FramingStats, DEFAULT_MAX_PAYLOAD, FRAME_MAGIC};
pub use transport::{LinkState, MeshTransport};

#[cfg(feature = "tcp")]
pub use transport::TcpTransport;

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

/// Default TCP port mesh devices listen on
pub const DEFAULT_DEVICE_PORT: u16 = 4403;

/// Build the framed `want_config_id` handshake packet sent right after
/// connecting; the device answers with its node database and then echoes
/// the nonce in a `config_complete_id`.
pub fn want_config_packet(nonce: u32) -> Result<Vec<u8>> {
    use prost::Message;

    let msg = proto::ToRadio {
        payload_variant: Some(proto::to_radio::PayloadVariant::WantConfigId(nonce)),
    };
    frame(&msg.encode_to_vec())
}

/// Build the framed link heartbeat packet that keeps a TCP device session
/// alive.
pub fn heartbeat_packet() -> Result<Vec<u8>> {
    use prost::Message;

    let msg = proto::ToRadio {
        payload_variant: Some(proto::to_radio::PayloadVariant::Heartbeat(
            proto::Heartbeat {},
        )),
    };
    frame(&msg.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn want_config_packet_is_framed() {
        let packet = want_config_packet(0xCAFE).unwrap();
        assert_eq!(&packet[..2], &[0x94, 0xC3]);

        let len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
        assert_eq!(packet.len(), 4 + len);

        let decoded = proto::ToRadio::decode(&packet[4..]).unwrap();
        assert_eq!(
            decoded.payload_variant,
            Some(proto::to_radio::PayloadVariant::WantConfigId(0xCAFE))
        );
    }

    #[test]
    fn heartbeat_packet_decodes() {
        let packet = heartbeat_packet().unwrap();
        let decoded = proto::ToRadio::decode(&packet[4..]).unwrap();
        assert!(matches!(
            decoded.payload_variant,
            Some(proto::to_radio::PayloadVariant::Heartbeat(_))
        ));
    }
}
