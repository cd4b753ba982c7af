//! usbmuxd client
//!
//! A [`MuxConnection`] is one socket to the daemon. Requests are strictly
//! serialized: the daemon echoes the request tag but nothing else correlates
//! replies, so a single mutex covers each write/read pair.
//!
//! `connect` consumes the connection and hands back the raw socket, now a
//! byte tunnel to a device-side port.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use il_protocol::document;
use il_protocol::mux::{
    port_to_wire, BuidResponse, DeviceListResponse, PairRecordResponse, ResultResponse,
    DEFAULT_MUX_SOCKET, DEFAULT_MUX_TCP_ADDRESS,
};
use il_protocol::{
    DeviceAttachment, DeviceId, DeviceRef, MuxFrame, MuxRequest, PairRecord, ResultCode, Udid,
    Value,
};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dial::{DialRegistry, DialTarget};
use crate::error::{DialError, LinkError, MuxError, Result};
use crate::framing::{read_mux_frame, write_mux_frame};
use crate::stream::BoxedStream;

/// Platform default daemon address
pub fn default_mux_address() -> String {
    if cfg!(unix) {
        format!("unix://{}", DEFAULT_MUX_SOCKET)
    } else {
        format!("tcp://{}", DEFAULT_MUX_TCP_ADDRESS)
    }
}

/// Optional identification fields attached to every request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Sent as `ProgName`
    pub prog_name: Option<String>,
    /// Sent as `ClientVersionString`
    pub client_version: Option<String>,
}

impl ClientIdentity {
    fn is_empty(&self) -> bool {
        self.prog_name.is_none() && self.client_version.is_none()
    }
}

/// A framed request/response connection to usbmuxd
pub struct MuxConnection {
    stream: Mutex<BoxedStream>,
    next_tag: AtomicU32,
    identity: ClientIdentity,
}

impl MuxConnection {
    /// Dial the daemon through the registry
    pub async fn dial(registry: &DialRegistry, address: &str) -> Result<Self> {
        let stream = registry.dial(address).await?;
        debug!(address, "Connected to usbmuxd");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream
    pub fn from_stream(stream: BoxedStream) -> Self {
        Self {
            stream: Mutex::new(stream),
            next_tag: AtomicU32::new(1),
            identity: ClientIdentity::default(),
        }
    }

    /// Attach `ProgName` / `ClientVersionString` to subsequent requests
    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Attached devices, placeholders without a stable identifier removed
    ///
    /// `udid` is always filled in, from `SerialNumber` when the daemon
    /// leaves `UDID` blank.
    pub async fn list_devices(&self) -> Result<Vec<DeviceAttachment>> {
        let response: DeviceListResponse = self.request(&MuxRequest::ListDevices).await?;

        let total = response.device_list.len();
        let devices: Vec<DeviceAttachment> = response
            .device_list
            .into_iter()
            .filter_map(|entry| {
                let mut properties = entry.properties?;
                if properties.device_id == 0 {
                    properties.device_id = entry.device_id;
                }
                let udid = properties.stable_id()?;
                properties.udid = udid.0;
                Some(properties)
            })
            .collect();

        if devices.len() != total {
            debug!(
                skipped = total - devices.len(),
                "Skipped device entries without a stable identifier"
            );
        }
        Ok(devices)
    }

    /// Resolve a stable identifier to the daemon's current numeric handle
    ///
    /// The handle is only valid until the device detaches; callers must
    /// resolve again before every use.
    pub async fn resolve_device_id(&self, udid: &Udid) -> Result<DeviceId> {
        self.list_devices()
            .await?
            .iter()
            .find(|device| device.matches(udid))
            .map(DeviceAttachment::device_id)
            .ok_or_else(|| LinkError::NotFound(format!("device {}", udid)))
    }

    /// Fetch the stored pairing record
    pub async fn read_pair_record(&self, udid: &Udid) -> Result<PairRecord> {
        let request = MuxRequest::ReadPairRecord {
            pair_record_id: udid.to_string(),
        };
        let response: PairRecordResponse = self.request(&request).await?;

        match response.pair_record_data {
            Some(data) if !data.is_empty() => Ok(document::decode(&data)?),
            _ => {
                debug!(udid = %udid, number = ?response.number, "No pair record");
                Err(LinkError::NotFound(format!("pair record for {}", udid)))
            }
        }
    }

    /// Store a pairing record
    pub async fn save_pair_record(&self, udid: &Udid, record: &PairRecord) -> Result<()> {
        let request = MuxRequest::SavePairRecord {
            pair_record_id: udid.to_string(),
            pair_record_data: document::encode(record)?,
        };
        self.request_ok(&request).await
    }

    /// Remove a pairing record
    pub async fn delete_pair_record(&self, udid: &Udid) -> Result<()> {
        let request = MuxRequest::DeletePairRecord {
            pair_record_id: udid.to_string(),
        };
        self.request_ok(&request).await
    }

    /// The daemon's system build identifier
    pub async fn read_buid(&self) -> Result<String> {
        let response: BuidResponse = self.request(&MuxRequest::ReadBuid).await?;
        match response.buid {
            Some(buid) => Ok(buid),
            None => Err(MuxError::Result {
                request: "ReadBUID",
                code: ResultCode::from_u64(response.number.unwrap_or(0)),
            }
            .into()),
        }
    }

    /// Turn this connection into a tunnel to `port` on the device
    ///
    /// A stable identifier is resolved to the current numeric handle on this
    /// same connection immediately before `Connect` is sent. The device can
    /// still reattach in between; that gap is not closed.
    pub async fn connect(self, device: impl Into<DeviceRef>, port: u16) -> Result<BoxedStream> {
        let device_id = match device.into() {
            DeviceRef::Id(id) => id,
            DeviceRef::Udid(udid) => self.resolve_device_id(&udid).await?,
        };

        let request = MuxRequest::Connect {
            device_id: device_id.as_u32(),
            port_number: port_to_wire(port),
        };
        let response: ResultResponse = self.request(&request).await?;

        match response.code() {
            ResultCode::Ok => {
                info!(device = %device_id, port, "usbmuxd tunnel established");
                Ok(self.stream.into_inner())
            }
            ResultCode::ConnectionRefused => Err(LinkError::ConnectionRefused(format!(
                "{} port {}",
                device_id, port
            ))),
            ResultCode::BadDevice => Err(LinkError::NotFound(device_id.to_string())),
            code => Err(MuxError::Result {
                request: "Connect",
                code,
            }
            .into()),
        }
    }

    /// Drop the connection
    pub fn close(self) {
        drop(self);
    }

    async fn request_ok(&self, request: &MuxRequest) -> Result<()> {
        let response: ResultResponse = self.request(request).await?;
        match response.code() {
            ResultCode::Ok => Ok(()),
            code => Err(MuxError::Result {
                request: request.name(),
                code,
            }
            .into()),
        }
    }

    async fn request<R: DeserializeOwned>(&self, request: &MuxRequest) -> Result<R> {
        let payload = self.encode_request(request)?;

        let mut stream = self.stream.lock().await;
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        debug!(request = request.name(), tag, "Sending usbmuxd request");

        write_mux_frame(&mut *stream, MuxFrame::new(tag, payload)).await?;
        let frame = read_mux_frame(&mut *stream).await?;
        drop(stream);

        if frame.tag != tag {
            warn!(
                request = request.name(),
                expected = tag,
                actual = frame.tag,
                "usbmuxd reply tag mismatch"
            );
        }
        debug!(request = request.name(), len = frame.payload.len(), "Received usbmuxd reply");

        match document::decode(&frame.payload) {
            Ok(response) => Ok(response),
            Err(e) => {
                // A well-formed document of the wrong shape is the daemon's
                // answer to a different question
                let value: Value = match document::decode(&frame.payload) {
                    Ok(value) => value,
                    Err(_) => return Err(e.into()),
                };
                Err(MuxError::UnexpectedResponse {
                    request: request.name(),
                    detail: format!("{} (got {})", e, value.kind()),
                }
                .into())
            }
        }
    }

    fn encode_request(&self, request: &MuxRequest) -> Result<Bytes> {
        let encoded = document::encode(request)?;
        if self.identity.is_empty() {
            return Ok(Bytes::from(encoded));
        }

        // Identity keys ride alongside whatever the request itself carries
        let mut value: Value = document::decode(&encoded)?;
        if let Value::Dictionary(dict) = &mut value {
            if let Some(name) = &self.identity.prog_name {
                dict.insert("ProgName".to_string(), Value::from(name.as_str()));
            }
            if let Some(version) = &self.identity.client_version {
                dict.insert(
                    "ClientVersionString".to_string(),
                    Value::from(version.as_str()),
                );
            }
        }
        Ok(Bytes::from(document::encode(&value)?))
    }
}

impl std::fmt::Debug for MuxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxConnection")
            .field("next_tag", &self.next_tag.load(Ordering::Relaxed))
            .field("identity", &self.identity)
            .finish()
    }
}

/// Install the `usbmux://UDID:PORT` scheme
///
/// Each dial opens a fresh daemon connection at `mux_address`, resolves the
/// UDID and tunnels to the port. The daemon itself must be reachable through
/// a scheme other than `usbmux`.
pub fn register_scheme(registry: &mut DialRegistry, mux_address: impl Into<String>) {
    let mux_address = mux_address.into();
    let daemon_registry = registry.clone();

    registry.register("usbmux", move |target: DialTarget| {
        let mux_address = mux_address.clone();
        let daemon_registry = daemon_registry.clone();
        async move {
            let (udid, port) = parse_device_authority(&target)?;
            let mux = MuxConnection::dial(&daemon_registry, &mux_address).await?;
            mux.connect(Udid::new(udid), port).await
        }
    });
}

fn parse_device_authority(target: &DialTarget) -> Result<(String, u16), DialError> {
    let invalid = || DialError::InvalidAddress(target.to_string());
    let (udid, port) = target.authority.rsplit_once(':').ok_or_else(invalid)?;
    if udid.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((udid.to_string(), port))
}
