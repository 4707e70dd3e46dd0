//! Streaming frame decoder for the mesh device protocol
//!
//! The device emits length-framed protobuf messages over a byte stream:
//!
//! - Bytes 0-1: Magic number `0x94C3` (big-endian)
//! - Bytes 2-3: Payload length (big-endian u16)
//! - Bytes 4+: Protobuf payload
//!
//! The stream may contain garbage between frames (boot logs, line noise on
//! serial, partial frames after reconnect), so the decoder resynchronizes:
//! an invalid magic drops exactly one byte, an out-of-range length drops the
//! two magic bytes. Either way decoding is invariant to how the input is
//! chunked across `push` calls.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::{ProtoError, Result};

/// Protocol magic number (first 2 bytes of every frame)
pub const FRAME_MAGIC: u16 = 0x94C3;

/// Default maximum payload length accepted from the stream
pub const DEFAULT_MAX_PAYLOAD: usize = 512;

/// Frame header length: magic (2) + length (2)
const HEADER_LEN: usize = 4;

/// Counters describing what the decoder has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramingStats {
    /// Complete frames delivered
    pub frames: u64,
    /// Bytes dropped while hunting for the magic number
    pub resync_bytes: u64,
    /// Frames rejected for a zero or oversized length field
    pub bad_lengths: u64,
}

/// Incremental decoder that demultiplexes a raw byte stream into frames.
///
/// Feed arbitrary chunks with [`FrameDecoder::push`]; each call returns the
/// payloads of every frame completed by that chunk. The decoder never
/// blocks and does O(1) amortized work per byte.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_payload: usize,
    stats: FramingStats,
}

impl FrameDecoder {
    /// Create a decoder with the default maximum payload length
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a decoder with a custom maximum payload length
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_MAX_PAYLOAD * 2),
            max_payload,
            stats: FramingStats::default(),
        }
    }

    /// Append input bytes and return every payload completed by them.
    ///
    /// Payload handling errors belong to the caller; nothing a consumer does
    /// with a returned payload can wedge the decoder state.
    pub fn push(&mut self, input: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(input);
        let mut out = Vec::new();

        while self.buf.len() >= HEADER_LEN {
            let magic = u16::from_be_bytes([self.buf[0], self.buf[1]]);
            if magic != FRAME_MAGIC {
                // Resynchronize one byte at a time so a magic number split
                // across chunk boundaries is never skipped.
                self.buf.advance(1);
                self.stats.resync_bytes += 1;
                continue;
            }

            let length = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
            if length == 0 || length > self.max_payload {
                warn!(length, max = self.max_payload, "Dropping frame with bad length");
                self.buf.advance(2);
                self.stats.bad_lengths += 1;
                continue;
            }

            let total = HEADER_LEN + length;
            if self.buf.len() < total {
                trace!(have = self.buf.len(), need = total, "Waiting for complete frame");
                break;
            }

            let frame = self.buf.split_to(total);
            self.stats.frames += 1;
            out.push(Bytes::copy_from_slice(&frame[HEADER_LEN..]));
        }

        out
    }

    /// Number of buffered bytes not yet forming a complete frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discard any partially buffered frame (e.g. after a reconnect)
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Decoder counters
    pub fn stats(&self) -> FramingStats {
        self.stats
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame a payload for writing to the device.
///
/// Produces `magic | length | payload` with big-endian fields. Fails if the
/// payload does not fit the 16-bit length field.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > u16::MAX as usize {
        return Err(ProtoError::PayloadTooLarge(payload.len()));
    }

    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&FRAME_MAGIC.to_be_bytes());
    packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    packet.extend_from_slice(payload);
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> Vec<u8> {
        frame(payload).unwrap()
    }

    #[test]
    fn decodes_single_frame() {
        let mut dec = FrameDecoder::new();
        let out = dec.push(&framed(b"hello"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), b"hello");
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut dec = FrameDecoder::new();
        let mut input = framed(b"one");
        input.extend_from_slice(&framed(b"two"));
        let out = dec.push(&input);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref(), b"one");
        assert_eq!(out[1].as_ref(), b"two");
    }

    #[test]
    fn waits_for_partial_frame() {
        let mut dec = FrameDecoder::new();
        let input = framed(b"split");
        assert!(dec.push(&input[..4]).is_empty());
        let out = dec.push(&input[4..]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), b"split");
    }

    #[test]
    fn resynchronizes_after_garbage() {
        let mut dec = FrameDecoder::new();
        let mut input = vec![0x00];
        input.extend_from_slice(&framed(b"payload"));
        let out = dec.push(&input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), b"payload");
        assert_eq!(dec.stats().resync_bytes, 1);
    }

    #[test]
    fn resynchronizes_through_long_garbage() {
        let mut dec = FrameDecoder::new();
        let mut input = b"boot log line from the radio\r\n".to_vec();
        input.extend_from_slice(&framed(b"x"));
        let out = dec.push(&input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), b"x");
    }

    #[test]
    fn chunk_boundary_invariance() {
        // The same byte stream must decode identically however it is
        // chunked, including a chunk boundary inside the magic number.
        let mut stream = vec![0x94]; // lone half-magic garbage byte
        stream.extend_from_slice(&framed(b"first"));
        stream.extend_from_slice(&framed(b"second"));

        for chunk_size in 1..stream.len() {
            let mut dec = FrameDecoder::new();
            let mut out = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                out.extend(dec.push(chunk));
            }
            assert_eq!(out.len(), 2, "chunk_size {}", chunk_size);
            assert_eq!(out[0].as_ref(), b"first");
            assert_eq!(out[1].as_ref(), b"second");
        }
    }

    #[test]
    fn rejects_zero_length() {
        let mut dec = FrameDecoder::new();
        let mut input = vec![0x94, 0xC3, 0x00, 0x00];
        input.extend_from_slice(&framed(b"ok"));
        let out = dec.push(&input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), b"ok");
        assert_eq!(dec.stats().bad_lengths, 1);
    }

    #[test]
    fn rejects_oversized_length() {
        let mut dec = FrameDecoder::with_max_payload(16);
        let mut input = vec![0x94, 0xC3, 0xFF, 0xFF];
        input.extend_from_slice(&framed(b"ok"));
        let out = dec.push(&input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), b"ok");
        assert_eq!(dec.stats().bad_lengths, 1);
    }

    #[test]
    fn frame_roundtrip() {
        let packet = frame(b"abc").unwrap();
        assert_eq!(&packet[..2], &[0x94, 0xC3]);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 3);
        assert_eq!(&packet[4..], b"abc");
    }

    #[test]
    fn frame_rejects_oversized_payload() {
        let big = vec![0u8; u16::MAX as usize + 1];
        assert!(frame(&big).is_err());
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut dec = FrameDecoder::new();
        dec.push(&[0x94, 0xC3, 0x00, 0x10, 0xAA]);
        assert!(dec.pending() > 0);
        dec.reset();
        assert_eq!(dec.pending(), 0);
        let out = dec.push(&framed(b"fresh"));
        assert_eq!(out.len(), 1);
    }
}
