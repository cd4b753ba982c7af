//! Frame header encoding/decoding
//!
//! usbmuxd frames use a 16-byte header, every field a little-endian u32:
//! - length: total frame size including the header
//! - version: protocol version (always 1 for property-list messages)
//! - message_type: payload kind (8 = property list)
//! - tag: request tag echoed back by the daemon
//!
//! Lockdown and service connections use a much simpler framing: a 4-byte
//! big-endian payload length followed by the payload.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the usbmuxd frame header in bytes
pub const MUX_HEADER_SIZE: usize = 16;

/// Size of the length prefix used by lockdown and service connections
pub const SESSION_PREFIX_SIZE: usize = 4;

/// Maximum payload size accepted by either framing dialect
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Protocol version carried in every property-list frame
pub const MUX_PROTOCOL_VERSION: u32 = 1;

/// Message type identifying a property-list payload
pub const MUX_MESSAGE_PLIST: u32 = 8;

/// usbmuxd frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxHeader {
    /// Total frame length, header included
    pub length: u32,
    /// Protocol version
    pub version: u32,
    /// Payload kind
    pub message_type: u32,
    /// Request tag
    pub tag: u32,
}

impl MuxHeader {
    /// Build the header for a property-list payload of `payload_len` bytes
    pub fn for_payload(payload_len: usize, tag: u32) -> Self {
        Self {
            length: (payload_len + MUX_HEADER_SIZE) as u32,
            version: MUX_PROTOCOL_VERSION,
            message_type: MUX_MESSAGE_PLIST,
            tag,
        }
    }

    /// Number of payload bytes following the header
    pub fn payload_len(&self) -> usize {
        self.length as usize - MUX_HEADER_SIZE
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(MUX_HEADER_SIZE);
        dst.put_u32_le(self.length);
        dst.put_u32_le(self.version);
        dst.put_u32_le(self.message_type);
        dst.put_u32_le(self.tag);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the declared length cannot hold the header.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < MUX_HEADER_SIZE {
            return Ok(None);
        }

        // Validate before consuming so a bad header leaves the buffer intact
        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if (length as usize) < MUX_HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader(length));
        }

        let length = src.get_u32_le();
        let version = src.get_u32_le();
        let message_type = src.get_u32_le();
        let tag = src.get_u32_le();

        Ok(Some(Self {
            length,
            version,
            message_type,
            tag,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = MuxHeader::for_payload(345, 7);

        let mut buf = BytesMut::with_capacity(MUX_HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(buf.len(), MUX_HEADER_SIZE);

        let decoded = MuxHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.message_type, 8);
    }

    #[test]
    fn test_length_counts_header() {
        for payload_len in [0usize, 1, 15, 16, 4096, MAX_PAYLOAD_SIZE] {
            let mut buf = BytesMut::new();
            MuxHeader::for_payload(payload_len, 1).encode(&mut buf);

            let decoded = MuxHeader::decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded.length as usize, payload_len + MUX_HEADER_SIZE);
            assert_eq!(decoded.payload_len(), payload_len);
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = BytesMut::new();
        MuxHeader::for_payload(4, 1).encode(&mut buf);
        assert_eq!(
            &buf[..],
            &[20, 0, 0, 0, 1, 0, 0, 0, 8, 0, 0, 0, 1, 0, 0, 0][..]
        );
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0u8; 12][..]);
        let result = MuxHeader::decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 12);
    }

    #[test]
    fn test_length_shorter_than_header() {
        let mut buf = BytesMut::from(&[8, 0, 0, 0, 1, 0, 0, 0, 8, 0, 0, 0, 1, 0, 0, 0][..]);
        let result = MuxHeader::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidHeader(8))));
        assert_eq!(buf.len(), MUX_HEADER_SIZE);
    }
}
