//! Exact-length frame I/O over a raw stream
//!
//! Frames are read with `read_exact` rather than through a buffered
//! `Framed`, so no bytes past the current frame are ever consumed. That keeps
//! the stream clean for the two in-place transitions: a usbmuxd connection
//! turning into a tunnel, and a session switching TLS on or off.

use bytes::{Bytes, BytesMut};
use il_protocol::frame::{MAX_PAYLOAD_SIZE, MUX_HEADER_SIZE, SESSION_PREFIX_SIZE};
use il_protocol::{MuxCodec, MuxFrame, MuxHeader, ProtocolError, SessionCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Result;

/// Read one usbmuxd frame
pub(crate) async fn read_mux_frame<S>(stream: &mut S) -> Result<MuxFrame>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::zeroed(MUX_HEADER_SIZE);
    stream.read_exact(&mut buf).await?;

    // Peek the header; the codec decodes it again once the payload is in
    let header = MuxHeader::decode(&mut buf.clone())?.ok_or(ProtocolError::IncompleteFrame {
        expected: MUX_HEADER_SIZE,
        actual: buf.len(),
    })?;

    let payload_len = header.payload_len();
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }
    buf.resize(MUX_HEADER_SIZE + payload_len, 0);
    stream.read_exact(&mut buf[MUX_HEADER_SIZE..]).await?;

    MuxCodec::new().decode(&mut buf)?.ok_or_else(|| {
        ProtocolError::IncompleteFrame {
            expected: MUX_HEADER_SIZE + payload_len,
            actual: buf.len(),
        }
        .into()
    })
}

/// Write one usbmuxd frame and flush
pub(crate) async fn write_mux_frame<S>(stream: &mut S, frame: MuxFrame) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    MuxCodec::new().encode(frame, &mut buf)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed session payload
pub(crate) async fn read_session_frame<S>(stream: &mut S) -> Result<Bytes>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::zeroed(SESSION_PREFIX_SIZE);
    stream.read_exact(&mut buf).await?;

    let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }
    buf.resize(SESSION_PREFIX_SIZE + payload_len, 0);
    stream.read_exact(&mut buf[SESSION_PREFIX_SIZE..]).await?;

    SessionCodec::new().decode(&mut buf)?.ok_or_else(|| {
        ProtocolError::IncompleteFrame {
            expected: SESSION_PREFIX_SIZE + payload_len,
            actual: buf.len(),
        }
        .into()
    })
}

/// Write one length-prefixed session payload and flush
pub(crate) async fn write_session_frame<S>(stream: &mut S, payload: Bytes) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    SessionCodec::new().encode(payload, &mut buf)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}
