//! Device-link handshake and message envelope
//!
//! Some services open with a version exchange before any application
//! traffic:
//!
//! ```text
//! device → ["DLMessageVersionExchange", major, minor]
//! host   → ["DLMessageVersionExchange", "DLVersionsOk", major]
//! device → ["DLMessageDeviceReady"]
//! ```
//!
//! After that every message travels as `["DLMessageProcessMessage", msg]`.

use il_protocol::lockdown::device_link::{
    DEVICE_READY, DISCONNECT, PROCESS_MESSAGE, VERSIONS_OK, VERSION_EXCHANGE,
};
use il_protocol::{ProtocolError, Value};
use serde::Serialize;
use tracing::{debug, warn};

use crate::client::FramedClient;
use crate::error::{LinkError, Result};

fn unexpected(detail: String) -> LinkError {
    ProtocolError::UnexpectedDocument(detail).into()
}

/// Tag and elements of a device-link array
fn split_message(value: Value) -> Result<(String, Vec<Value>)> {
    let kind = value.kind();
    let mut items = value
        .into_array()
        .ok_or_else(|| unexpected(format!("device-link message is a {}, not an array", kind)))?;
    if items.is_empty() {
        return Err(unexpected("empty device-link message".to_string()));
    }
    let tag = items
        .remove(0)
        .into_string()
        .ok_or_else(|| unexpected("device-link message tag is not a string".to_string()))?;
    Ok((tag, items))
}

impl FramedClient {
    /// Perform the version exchange; returns the version the device offered
    ///
    /// The opening tag is not enforced, only the presence of a version
    /// token. Any array counts as the readiness message.
    pub async fn handshake(&mut self) -> Result<Value> {
        let opening = self.recv_value().await?;
        let kind = opening.kind();
        let mut items = opening
            .into_array()
            .ok_or_else(|| unexpected(format!("version exchange is a {}, not an array", kind)))?;
        if items.len() < 2 {
            return Err(unexpected("version exchange without a version".to_string()));
        }
        match items[0].as_str() {
            Some(VERSION_EXCHANGE) => {}
            other => warn!(tag = ?other, "Unfamiliar device-link opening, continuing"),
        }
        let version = items.swap_remove(1);
        debug!(version = %version, "Device-link version exchange");

        self.send(&(VERSION_EXCHANGE, VERSIONS_OK, &version)).await?;

        let ready = self.recv_value().await?;
        let Some(ready_items) = ready.as_array() else {
            return Err(unexpected(format!(
                "readiness message is a {}, not an array",
                ready.kind()
            )));
        };
        match ready_items.first().and_then(Value::as_str) {
            Some(DEVICE_READY) => debug!("Device-link ready"),
            other => warn!(tag = ?other, "Unfamiliar device-link readiness message, continuing"),
        }
        Ok(version)
    }

    /// Send `message` inside the process-message envelope
    pub async fn send_wrapped<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        self.send(&(PROCESS_MESSAGE, message)).await
    }

    /// Receive one enveloped message
    ///
    /// A disconnect from the device surfaces as `NotConnected`.
    pub async fn recv_wrapped(&mut self) -> Result<Value> {
        let (tag, mut items) = split_message(self.recv_value().await?)?;
        match tag.as_str() {
            PROCESS_MESSAGE if !items.is_empty() => Ok(items.swap_remove(0)),
            DISCONNECT => {
                debug!(reason = ?items.first(), "Device-link disconnect");
                Err(LinkError::NotConnected)
            }
            _ => Err(unexpected(format!("unexpected device-link message {}", tag))),
        }
    }

    /// Tell the device this side is done
    pub async fn disconnect_wrapped(&mut self, reason: &str) -> Result<()> {
        self.send(&(DISCONNECT, reason)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{read_session_frame, write_session_frame};
    use crate::stream::boxed;
    use bytes::Bytes;
    use il_protocol::{document, plist_array, Dictionary};
    use tokio::io::DuplexStream;

    async fn peer_send(sock: &mut DuplexStream, value: Value) {
        let payload = document::encode(&value).unwrap();
        write_session_frame(sock, Bytes::from(payload)).await.unwrap();
    }

    async fn peer_recv(sock: &mut DuplexStream) -> Value {
        let payload = read_session_frame(sock).await.unwrap();
        document::decode(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_handshake_then_wrapped_traffic() {
        let (client, mut device) = tokio::io::duplex(64 * 1024);
        let mut client = FramedClient::new(boxed(client));

        let script = tokio::spawn(async move {
            peer_send(&mut device, plist_array![VERSION_EXCHANGE, 7i64, 0i64]).await;
            let ack = peer_recv(&mut device).await;
            peer_send(&mut device, plist_array![DEVICE_READY]).await;

            let wrapped = peer_recv(&mut device).await;
            let mut reply = Dictionary::new();
            reply.insert("MessageType".into(), Value::from("Ack"));
            peer_send(
                &mut device,
                plist_array![PROCESS_MESSAGE, Value::Dictionary(reply)],
            )
            .await;
            (ack, wrapped)
        });

        let version = client.handshake().await.unwrap();
        assert_eq!(version, Value::Integer(7));

        let mut request = Dictionary::new();
        request.insert("MessageType".into(), Value::from("ScreenShotRequest"));
        client
            .send_wrapped(&Value::Dictionary(request.clone()))
            .await
            .unwrap();
        let reply = client.recv_wrapped().await.unwrap();
        assert_eq!(
            reply.get("MessageType").and_then(Value::as_str),
            Some("Ack")
        );

        let (ack, wrapped) = script.await.unwrap();
        assert_eq!(
            ack,
            plist_array![VERSION_EXCHANGE, VERSIONS_OK, 7i64]
        );
        assert_eq!(
            wrapped,
            plist_array![PROCESS_MESSAGE, Value::Dictionary(request)]
        );
    }

    #[tokio::test]
    async fn test_handshake_tolerates_unfamiliar_tags() {
        let (client, mut device) = tokio::io::duplex(64 * 1024);
        let mut client = FramedClient::new(boxed(client));

        let script = tokio::spawn(async move {
            peer_send(&mut device, plist_array!["VersionExchange", "VersionsOk", 7i64]).await;
            let ack = peer_recv(&mut device).await;
            peer_send(&mut device, plist_array!["Ready"]).await;

            let wrapped = peer_recv(&mut device).await;
            peer_send(&mut device, plist_array![PROCESS_MESSAGE, "pong"]).await;
            (ack, wrapped)
        });

        let version = client.handshake().await.unwrap();
        assert_eq!(version, Value::from("VersionsOk"));

        client.send_wrapped("ping").await.unwrap();
        assert_eq!(client.recv_wrapped().await.unwrap(), Value::from("pong"));

        let (ack, wrapped) = script.await.unwrap();
        assert_eq!(
            ack,
            plist_array![VERSION_EXCHANGE, VERSIONS_OK, "VersionsOk"]
        );
        assert_eq!(wrapped, plist_array![PROCESS_MESSAGE, "ping"]);
    }

    #[tokio::test]
    async fn test_handshake_rejects_non_array_opening() {
        let (client, mut device) = tokio::io::duplex(4096);
        let mut client = FramedClient::new(boxed(client));
        peer_send(&mut device, Value::from("Hello")).await;

        let err = client.handshake().await.unwrap_err();
        assert!(err.is_decode());
    }

    #[tokio::test]
    async fn test_handshake_requires_version() {
        let (client, mut device) = tokio::io::duplex(4096);
        let mut client = FramedClient::new(boxed(client));
        peer_send(&mut device, plist_array![VERSION_EXCHANGE]).await;

        assert!(client.handshake().await.unwrap_err().is_decode());
    }

    #[tokio::test]
    async fn test_recv_wrapped_disconnect() {
        let (client, mut device) = tokio::io::duplex(4096);
        let mut client = FramedClient::new(boxed(client));
        peer_send(&mut device, plist_array![DISCONNECT, "bye"]).await;

        assert!(matches!(
            client.recv_wrapped().await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_wrapped_sends_envelope() {
        let (client, mut device) = tokio::io::duplex(4096);
        let mut client = FramedClient::new(boxed(client));
        client.disconnect_wrapped("done").await.unwrap();

        assert_eq!(
            peer_recv(&mut device).await,
            plist_array![DISCONNECT, "done"]
        );
    }
}
