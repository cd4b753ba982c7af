//! Lockdown message types
//!
//! Lockdown listens on a fixed device port and speaks length-prefixed
//! property lists. Every request names its operation in the `Request` key;
//! failures are reported in-band through an `Error` string.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Device-side port of the lockdown service
pub const LOCKDOWN_PORT: u16 = 62078;

/// Requests understood by lockdown
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "Request")]
pub enum LockdownRequest {
    /// Identify the responder (always `com.apple.mobile.lockdown`)
    QueryType,

    /// Start an authenticated session using the pairing record identity
    StartSession {
        #[serde(rename = "HostID")]
        host_id: String,
        #[serde(rename = "SystemBUID")]
        system_buid: String,
    },

    /// End a session started with `StartSession`
    StopSession {
        #[serde(rename = "SessionID")]
        session_id: String,
    },

    /// Read one key, one domain, or the whole default domain
    GetValue {
        #[serde(rename = "Domain", skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
        #[serde(rename = "Key", skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },

    /// Activate a named service and learn its port
    StartService {
        #[serde(rename = "Service")]
        service: String,
        #[serde(
            rename = "EscrowBag",
            with = "serde_bytes",
            skip_serializing_if = "Option::is_none"
        )]
        escrow_bag: Option<Vec<u8>>,
    },

    /// Reboot into recovery mode
    EnterRecovery,
}

impl LockdownRequest {
    /// Name of the operation, as sent in `Request`
    pub fn name(&self) -> &'static str {
        match self {
            LockdownRequest::QueryType => "QueryType",
            LockdownRequest::StartSession { .. } => "StartSession",
            LockdownRequest::StopSession { .. } => "StopSession",
            LockdownRequest::GetValue { .. } => "GetValue",
            LockdownRequest::StartService { .. } => "StartService",
            LockdownRequest::EnterRecovery => "EnterRecovery",
        }
    }
}

/// Responses that may carry an in-band `Error`
pub trait LockdownResponse {
    fn error(&self) -> Option<&str>;
}

macro_rules! impl_lockdown_response {
    ($($ty:ty),* $(,)?) => {
        $(impl LockdownResponse for $ty {
            fn error(&self) -> Option<&str> {
                self.error.as_deref()
            }
        })*
    };
}

/// Reply with no payload beyond status
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusResponse {
    #[serde(rename = "Request")]
    pub request: Option<String>,
    #[serde(rename = "Result")]
    pub result: Option<String>,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

/// Reply to `QueryType`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryTypeResponse {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

/// Reply to `StartSession`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartSessionResponse {
    #[serde(rename = "EnableSessionSSL")]
    pub enable_session_ssl: bool,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

/// Reply to `GetValue`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GetValueResponse {
    #[serde(rename = "Domain")]
    pub domain: Option<String>,
    #[serde(rename = "Key")]
    pub key: Option<String>,
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

/// Reply to `StartService`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartServiceResponse {
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "EnableServiceSSL")]
    pub enable_service_ssl: bool,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

/// Typed view of the default-domain `GetValue` dictionary
///
/// Only the commonly used keys; the full dictionary is always available as
/// a [`Value`] alongside.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceValues {
    #[serde(rename = "DeviceName")]
    pub device_name: String,
    #[serde(rename = "DeviceClass")]
    pub device_class: String,
    #[serde(rename = "DeviceColor")]
    pub device_color: String,
    #[serde(rename = "ProductName")]
    pub product_name: String,
    #[serde(rename = "ProductType")]
    pub product_type: String,
    #[serde(rename = "ProductVersion")]
    pub product_version: String,
    #[serde(rename = "BuildVersion")]
    pub build_version: String,
    #[serde(rename = "HardwareModel")]
    pub hardware_model: String,
    #[serde(rename = "CPUArchitecture")]
    pub cpu_architecture: String,
    #[serde(rename = "BasebandVersion")]
    pub baseband_version: String,
    #[serde(rename = "ProtocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "BoardId")]
    pub board_id: i64,
    #[serde(rename = "ChipID")]
    pub chip_id: i64,
    #[serde(rename = "UniqueChipID")]
    pub unique_chip_id: u64,
    #[serde(rename = "UniqueDeviceID")]
    pub unique_device_id: String,
    #[serde(rename = "SerialNumber")]
    pub serial_number: String,
    #[serde(rename = "WiFiAddress")]
    pub wifi_address: String,
    #[serde(rename = "TelephonyCapability")]
    pub telephony_capability: bool,
    #[serde(rename = "SupportedDeviceFamilies")]
    pub supported_device_families: Vec<i64>,
}

/// `GetValue` reply decoded straight into [`DeviceValues`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceValuesResponse {
    #[serde(rename = "Value")]
    pub value: DeviceValues,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

impl_lockdown_response!(
    StatusResponse,
    QueryTypeResponse,
    StartSessionResponse,
    GetValueResponse,
    StartServiceResponse,
    DeviceValuesResponse,
);

/// Device-link (legacy handshake) message tags
pub mod device_link {
    pub const VERSION_EXCHANGE: &str = "DLMessageVersionExchange";
    pub const VERSIONS_OK: &str = "DLVersionsOk";
    pub const DEVICE_READY: &str = "DLMessageDeviceReady";
    pub const PROCESS_MESSAGE: &str = "DLMessageProcessMessage";
    pub const DISCONNECT: &str = "DLMessageDisconnect";
}
