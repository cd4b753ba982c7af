//! usbmuxd message types
//!
//! Requests are property-list dictionaries whose `MessageType` key selects
//! the operation. Responses are either an operation-specific dictionary or
//! a generic `Result` message carrying a numeric code.
//!
//! # Message Flow
//!
//! 1. `ListDevices` → `{ DeviceList: [...] }`
//! 2. `ReadPairRecord` / `SavePairRecord` / `DeletePairRecord` → pairing store
//! 3. `ReadBUID` → `{ BUID }`
//! 4. `Connect` → `Result`; on success the socket becomes a raw tunnel

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::{DeviceId, Udid};

/// Default usbmuxd socket on POSIX systems
pub const DEFAULT_MUX_SOCKET: &str = "/var/run/usbmuxd";

/// Default usbmuxd address on platforms without unix sockets
pub const DEFAULT_MUX_TCP_ADDRESS: &str = "127.0.0.1:27015";

/// Requests understood by usbmuxd
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "MessageType")]
pub enum MuxRequest {
    /// Enumerate attached devices
    ListDevices,

    /// Turn the connection into a tunnel to a device-side port
    Connect {
        #[serde(rename = "DeviceID")]
        device_id: u32,
        /// Port in network byte order, see [`port_to_wire`]
        #[serde(rename = "PortNumber")]
        port_number: u16,
    },

    /// Fetch the stored pairing record for a UDID
    ReadPairRecord {
        #[serde(rename = "PairRecordID")]
        pair_record_id: String,
    },

    /// Store a pairing record for a UDID
    SavePairRecord {
        #[serde(rename = "PairRecordID")]
        pair_record_id: String,
        #[serde(rename = "PairRecordData", with = "serde_bytes")]
        pair_record_data: Vec<u8>,
    },

    /// Remove the pairing record for a UDID
    DeletePairRecord {
        #[serde(rename = "PairRecordID")]
        pair_record_id: String,
    },

    /// Read the daemon's system build identifier
    #[serde(rename = "ReadBUID")]
    ReadBuid,
}

impl MuxRequest {
    /// Name of the operation, as sent in `MessageType`
    pub fn name(&self) -> &'static str {
        match self {
            MuxRequest::ListDevices => "ListDevices",
            MuxRequest::Connect { .. } => "Connect",
            MuxRequest::ReadPairRecord { .. } => "ReadPairRecord",
            MuxRequest::SavePairRecord { .. } => "SavePairRecord",
            MuxRequest::DeletePairRecord { .. } => "DeletePairRecord",
            MuxRequest::ReadBuid => "ReadBUID",
        }
    }
}

/// Encode a port the way usbmuxd expects it in `Connect`
///
/// Every other integer in the protocol travels in the document's own
/// encoding, but the port number is byte-swapped into network order.
pub fn port_to_wire(port: u16) -> u16 {
    port.swap_bytes()
}

/// Result codes carried by `Result` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    BadCommand,
    BadDevice,
    ConnectionRefused,
    BadVersion,
    /// A code this client does not know about
    Other(u64),
}

impl ResultCode {
    /// Convert from the wire value
    pub fn from_u64(value: u64) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::BadCommand,
            2 => Self::BadDevice,
            3 => Self::ConnectionRefused,
            6 => Self::BadVersion,
            other => Self::Other(other),
        }
    }

    /// Convert to the wire value
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Ok => 0,
            Self::BadCommand => 1,
            Self::BadDevice => 2,
            Self::ConnectionRefused => 3,
            Self::BadVersion => 6,
            Self::Other(v) => *v,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Ok => write!(f, "ok"),
            ResultCode::BadCommand => write!(f, "bad command"),
            ResultCode::BadDevice => write!(f, "bad device"),
            ResultCode::ConnectionRefused => write!(f, "connection refused"),
            ResultCode::BadVersion => write!(f, "bad version"),
            ResultCode::Other(v) => write!(f, "unknown result {}", v),
        }
    }
}

/// Generic `Result` message
#[derive(Debug, Clone, Deserialize)]
pub struct ResultResponse {
    #[serde(rename = "MessageType", default)]
    pub message_type: Option<String>,
    #[serde(rename = "Number")]
    pub number: u64,
}

impl ResultResponse {
    pub fn code(&self) -> ResultCode {
        ResultCode::from_u64(self.number)
    }
}

/// Properties of one attached device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceAttachment {
    #[serde(rename = "ConnectionSpeed")]
    pub connection_speed: i64,
    #[serde(rename = "ConnectionType")]
    pub connection_type: String,
    #[serde(rename = "DeviceID")]
    pub device_id: u32,
    #[serde(rename = "LocationID")]
    pub location_id: i64,
    #[serde(rename = "ProductID")]
    pub product_id: i64,
    #[serde(rename = "SerialNumber")]
    pub serial_number: String,
    #[serde(rename = "UDID")]
    pub udid: String,
    #[serde(rename = "USBSerialNumber")]
    pub usb_serial_number: String,
}

impl DeviceAttachment {
    /// The daemon's current numeric handle for this device
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.device_id)
    }

    /// Stable identifier: `UDID`, falling back to `SerialNumber` on
    /// daemons that only report the latter. None for placeholder entries.
    pub fn stable_id(&self) -> Option<Udid> {
        if !self.udid.is_empty() {
            Some(Udid::new(self.udid.clone()))
        } else if !self.serial_number.is_empty() {
            Some(Udid::new(self.serial_number.clone()))
        } else {
            None
        }
    }

    /// Whether this entry refers to the given stable identifier
    pub fn matches(&self, udid: &Udid) -> bool {
        (!self.udid.is_empty() && self.udid == udid.as_str())
            || (!self.serial_number.is_empty() && self.serial_number == udid.as_str())
    }
}

/// One `DeviceList` element
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceListEntry {
    #[serde(rename = "DeviceID")]
    pub device_id: u32,
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "Properties")]
    pub properties: Option<DeviceAttachment>,
}

/// Reply to `ListDevices`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceListResponse {
    #[serde(rename = "DeviceList", default)]
    pub device_list: Vec<DeviceListEntry>,
}

/// Reply to `ReadPairRecord`; a missing record comes back as a bare `Result`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairRecordResponse {
    #[serde(rename = "PairRecordData", default, with = "serde_bytes")]
    pub pair_record_data: Option<Vec<u8>>,
    #[serde(rename = "Number", default)]
    pub number: Option<u64>,
}

/// Reply to `ReadBUID`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuidResponse {
    #[serde(rename = "BUID", default)]
    pub buid: Option<String>,
    #[serde(rename = "Number", default)]
    pub number: Option<u64>,
}

/// Pairing material established once per device/host pair
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairRecord {
    #[serde(rename = "DeviceCertificate", with = "serde_bytes")]
    pub device_certificate: Vec<u8>,
    #[serde(rename = "EscrowBag", with = "serde_bytes")]
    pub escrow_bag: Vec<u8>,
    #[serde(rename = "HostCertificate", with = "serde_bytes")]
    pub host_certificate: Vec<u8>,
    #[serde(rename = "HostID")]
    pub host_id: String,
    #[serde(rename = "HostPrivateKey", with = "serde_bytes")]
    pub host_private_key: Vec<u8>,
    #[serde(rename = "RootCertificate", with = "serde_bytes")]
    pub root_certificate: Vec<u8>,
    #[serde(rename = "RootPrivateKey", with = "serde_bytes")]
    pub root_private_key: Vec<u8>,
    #[serde(rename = "SystemBUID")]
    pub system_buid: String,
    #[serde(rename = "WiFiMACAddress")]
    pub wifi_mac_address: String,
}

impl fmt::Debug for PairRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairRecord")
            .field("host_id", &self.host_id)
            .field("system_buid", &self.system_buid)
            .field("wifi_mac_address", &self.wifi_mac_address)
            .field("host_certificate", &format!("<{} bytes>", self.host_certificate.len()))
            .field("host_private_key", &"<redacted>")
            .field("root_private_key", &"<redacted>")
            .field("escrow_bag", &format!("<{} bytes>", self.escrow_bag.len()))
            .finish()
    }
}
