//! Tokio codecs for the two framing dialects

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{MuxHeader, MAX_PAYLOAD_SIZE, MUX_MESSAGE_PLIST, SESSION_PREFIX_SIZE};

/// A complete usbmuxd frame with its request tag and raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxFrame {
    /// Request tag this frame carries
    pub tag: u32,
    /// Property-list payload bytes
    pub payload: Bytes,
}

impl MuxFrame {
    /// Create a new frame
    pub fn new(tag: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }
}

/// Codec for encoding/decoding usbmuxd frames
#[derive(Debug, Default)]
pub struct MuxCodec {
    /// Current header being decoded (if any)
    pending_header: Option<MuxHeader>,
}

impl MuxCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for MuxCodec {
    type Item = MuxFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match MuxHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if src.len() < payload_len {
            self.pending_header = Some(header);
            return Ok(None);
        }

        if header.message_type != MUX_MESSAGE_PLIST {
            tracing::warn!(
                message_type = header.message_type,
                "usbmuxd frame is not a property list"
            );
        }

        let payload = src.split_to(payload_len).freeze();
        Ok(Some(MuxFrame {
            tag: header.tag,
            payload,
        }))
    }
}

impl Encoder<MuxFrame> for MuxCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: MuxFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = frame.payload.len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        MuxHeader::for_payload(payload_len, frame.tag).encode(dst);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// Codec for the 4-byte big-endian length-prefixed dialect used by
/// lockdown and every service connection
#[derive(Debug, Default)]
pub struct SessionCodec {
    pending_len: Option<usize>,
}

impl SessionCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self { pending_len: None }
    }
}

impl Decoder for SessionCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let payload_len = match self.pending_len.take() {
            Some(len) => len,
            None => {
                if src.len() < SESSION_PREFIX_SIZE {
                    return Ok(None);
                }
                let len = src.get_u32() as usize;
                if len > MAX_PAYLOAD_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: len,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                len
            }
        };

        if src.len() < payload_len {
            self.pending_len = Some(payload_len);
            return Ok(None);
        }

        Ok(Some(src.split_to(payload_len).freeze()))
    }
}

impl Encoder<Bytes> for SessionCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(SESSION_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MUX_HEADER_SIZE;

    #[test]
    fn test_mux_codec_roundtrip() {
        let mut codec = MuxCodec::new();
        let frame = MuxFrame::new(3, &b"<plist/>"[..]);

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), MUX_HEADER_SIZE + 8);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_mux_codec_partial_read() {
        let mut codec = MuxCodec::new();
        let mut full_buf = BytesMut::new();
        codec
            .encode(MuxFrame::new(1, &b"0123456789"[..]), &mut full_buf)
            .unwrap();

        // Header only: the codec must remember it while waiting for the payload
        let mut partial = full_buf.split_to(MUX_HEADER_SIZE + 4);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.payload.as_ref(), b"0123456789");
    }

    #[test]
    fn test_session_codec_big_endian_prefix() {
        let mut codec = SessionCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"hello"), &mut buf)
            .unwrap();

        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.as_ref(), b"hello");
    }

    #[test]
    fn test_session_codec_partial_read() {
        let mut codec = SessionCodec::new();
        let mut full_buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"partial payload"), &mut full_buf)
            .unwrap();

        let mut partial = full_buf.split_to(2);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full_buf.split_to(6));
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full_buf);

        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.as_ref(), b"partial payload");
    }

    #[test]
    fn test_session_codec_rejects_oversized_length() {
        let mut codec = SessionCodec::new();
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0xFF, 0xFF][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
