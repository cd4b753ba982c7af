//! Length-prefixed document client
//!
//! Lockdown and every per-feature service speak the same framing: a 4-byte
//! big-endian length followed by a property list. [`FramedClient`] owns one
//! such connection and can switch it into and out of TLS in place.

use std::fmt;

use bytes::Bytes;
use il_protocol::{document, PairRecord, Udid, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::{LinkError, Result};
use crate::framing::{read_session_frame, write_session_frame};
use crate::stream::{boxed, AsyncStream, BoxedStream};
use crate::tls;

/// The connection currently carrying frames
enum Transport {
    Plain(BoxedStream),
    Secure(Box<TlsStream<BoxedStream>>),
    Closed,
}

impl Transport {
    fn name(&self) -> &'static str {
        match self {
            Transport::Plain(_) => "plain",
            Transport::Secure(_) => "secure",
            Transport::Closed => "closed",
        }
    }
}

/// A framed document connection to a device-side service
pub struct FramedClient {
    transport: Transport,
    udid: Option<Udid>,
    pair_record: Option<PairRecord>,
}

impl FramedClient {
    /// Wrap a connected stream (usually a usbmuxd tunnel)
    pub fn new(stream: BoxedStream) -> Self {
        Self {
            transport: Transport::Plain(stream),
            udid: None,
            pair_record: None,
        }
    }

    /// Record which device this connection belongs to
    pub fn with_device(mut self, udid: Udid, pair_record: Option<PairRecord>) -> Self {
        self.udid = Some(udid);
        self.pair_record = pair_record;
        self
    }

    pub fn udid(&self) -> Option<&Udid> {
        self.udid.as_ref()
    }

    pub fn pair_record(&self) -> Option<&PairRecord> {
        self.pair_record.as_ref()
    }

    /// Whether frames currently travel inside TLS
    pub fn is_secure(&self) -> bool {
        matches!(self.transport, Transport::Secure(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.transport, Transport::Closed)
    }

    /// Serialize and send one message
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        let payload = document::encode(message)?;
        debug!(len = payload.len(), transport = self.transport.name(), "Sending frame");
        write_session_frame(self.active()?, Bytes::from(payload)).await
    }

    /// Receive one message
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T> {
        let payload = self.recv_bytes().await?;
        Ok(document::decode(&payload)?)
    }

    /// Receive one frame without decoding it
    pub async fn recv_bytes(&mut self) -> Result<Bytes> {
        let payload = read_session_frame(self.active()?).await?;
        debug!(len = payload.len(), transport = self.transport.name(), "Received frame");
        Ok(payload)
    }

    /// Send `request` and wait for its reply; no pipelining
    pub async fn request<Req, Resp>(&mut self, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.send(request).await?;
        self.recv().await
    }

    pub async fn send_value(&mut self, value: &Value) -> Result<()> {
        self.send(value).await
    }

    pub async fn recv_value(&mut self) -> Result<Value> {
        self.recv().await
    }

    /// Upgrade the active connection to TLS using the host identity in
    /// `record`
    ///
    /// A failed handshake closes the connection; the client stays `Closed`.
    pub async fn enable_tls(&mut self, record: &PairRecord) -> Result<()> {
        match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Plain(stream) => {
                let tls = tls::connect(stream, record).await?;
                self.transport = Transport::Secure(Box::new(tls));
                debug!("Session upgraded to TLS");
                Ok(())
            }
            secure @ Transport::Secure(_) => {
                self.transport = secure;
                Ok(())
            }
            Transport::Closed => Err(LinkError::NotConnected),
        }
    }

    /// Drop the TLS layer and continue in cleartext on the same socket
    ///
    /// No close_notify is sent; the peer is expected to make the same switch.
    pub fn disable_tls(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Secure(tls) => {
                let (stream, _session) = (*tls).into_inner();
                self.transport = Transport::Plain(stream);
                debug!("Session downgraded to cleartext");
                Ok(())
            }
            plain @ Transport::Plain(_) => {
                self.transport = plain;
                Ok(())
            }
            Transport::Closed => Err(LinkError::NotConnected),
        }
    }

    /// Give up framing and take the active stream
    pub fn into_stream(mut self) -> Result<BoxedStream> {
        match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Plain(stream) => Ok(stream),
            Transport::Secure(tls) => Ok(boxed(*tls)),
            Transport::Closed => Err(LinkError::NotConnected),
        }
    }

    /// Shut the connection down; closing twice is a no-op
    pub async fn close(&mut self) -> Result<()> {
        let result = match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Plain(mut stream) => stream.shutdown().await,
            Transport::Secure(mut tls) => tls.shutdown().await,
            Transport::Closed => return Ok(()),
        };
        if let Err(e) = result {
            // The peer may already be gone; the socket is dropped either way
            debug!(error = %e, "Shutdown failed");
        }
        Ok(())
    }

    fn active(&mut self) -> Result<&mut dyn AsyncStream> {
        match &mut self.transport {
            Transport::Plain(stream) => Ok(&mut **stream),
            Transport::Secure(tls) => {
                let stream: &mut dyn AsyncStream = &mut **tls;
                Ok(stream)
            }
            Transport::Closed => Err(LinkError::NotConnected),
        }
    }
}

impl fmt::Debug for FramedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedClient")
            .field("transport", &self.transport.name())
            .field("udid", &self.udid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::tests::{test_pair_record, test_server_config};
    use il_protocol::Dictionary;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio_rustls::TlsAcceptor;

    fn pair() -> (FramedClient, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (FramedClient::new(boxed(client)), server)
    }

    fn sample() -> Value {
        let mut dict = Dictionary::new();
        dict.insert("Label".into(), Value::from("ilink"));
        dict.insert("Count".into(), Value::from(3i64));
        dict.insert("Blob".into(), Value::from(vec![0u8, 1, 2, 254]));
        Value::Dictionary(dict)
    }

    #[tokio::test]
    async fn test_send_writes_big_endian_prefix() {
        let (mut client, mut server) = pair();
        client.send_value(&sample()).await.unwrap();

        let mut prefix = [0u8; 4];
        server.read_exact(&mut prefix).await.unwrap();
        let len = u32::from_be_bytes(prefix) as usize;
        let mut body = vec![0u8; len];
        server.read_exact(&mut body).await.unwrap();

        let decoded: Value = document::decode(&body).unwrap();
        assert_eq!(decoded, sample());
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let (mut client, mut server) = pair();
        let echo = tokio::spawn(async move {
            let payload = read_session_frame(&mut server).await.unwrap();
            write_session_frame(&mut server, payload).await.unwrap();
        });

        let reply: Value = client.request(&sample()).await.unwrap();
        assert_eq!(reply, sample());
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payload_is_decode_error() {
        let (mut client, mut server) = pair();
        write_session_frame(&mut server, Bytes::from_static(b"<plist><dict><key>"))
            .await
            .unwrap();

        let err = client.recv_value().await.unwrap_err();
        assert!(err.is_decode());
    }

    #[tokio::test]
    async fn test_tls_excursion_preserves_framing() {
        let (mut client, server) = pair();
        let record = test_pair_record();
        let acceptor = TlsAcceptor::from(test_server_config());

        let device = tokio::spawn(async move {
            let mut raw = server;
            let hello = read_session_frame(&mut raw).await.unwrap();

            let mut tls = acceptor.accept(raw).await.unwrap();
            let secret = read_session_frame(&mut tls).await.unwrap();
            write_session_frame(&mut tls, secret).await.unwrap();

            let (mut raw, _) = tls.into_inner();
            let clear = read_session_frame(&mut raw).await.unwrap();
            write_session_frame(&mut raw, clear).await.unwrap();
            hello
        });

        client.send(&"hello").await.unwrap();

        client.enable_tls(&record).await.unwrap();
        assert!(client.is_secure());
        let reply: Value = client.request(&sample()).await.unwrap();
        assert_eq!(reply, sample());

        client.disable_tls().unwrap();
        assert!(!client.is_secure());
        let reply: Value = client.request(&sample()).await.unwrap();
        assert_eq!(reply, sample());

        let hello = device.await.unwrap();
        assert_eq!(document::decode::<String>(&hello).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_client() {
        let (mut client, mut server) = pair();
        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = server.read(&mut buf).await;
            let _ = tokio::io::AsyncWriteExt::write_all(&mut server, b"garbage!").await;
            let mut rest = Vec::new();
            let _ = server.read_to_end(&mut rest).await;
        });

        let record = test_pair_record();
        assert!(client.enable_tls(&record).await.is_err());
        assert!(client.is_closed());
        assert!(matches!(
            client.send(&"again").await,
            Err(LinkError::NotConnected)
        ));

        // Peer sees EOF because the socket was dropped
        tokio::time::timeout(std::time::Duration::from_secs(5), peer)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut client, mut server) = pair();
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(client.disable_tls().is_err());

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_into_stream_hands_over_raw_bytes() {
        let (mut client, mut server) = pair();
        client.send(&"framed").await.unwrap();
        let mut raw = client.into_stream().unwrap();

        read_session_frame(&mut server).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut raw, b"raw").await.unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"raw");
    }
}
