//! Device identifier types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Daemon-assigned numeric device identifier
///
/// Only valid until the device detaches or reattaches. Resolve it right
/// before use and never persist it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Create a new device ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device-{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Stable unique device identifier (UDID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Udid(pub String);

impl Udid {
    /// Create a new UDID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw UDID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Udid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Udid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Udid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Either form of device reference accepted by a tunnel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRef {
    /// A numeric ID the caller just obtained from an enumeration
    Id(DeviceId),
    /// A stable UDID, resolved to a numeric ID immediately before use
    Udid(Udid),
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Id(id) => write!(f, "{}", id),
            DeviceRef::Udid(udid) => write!(f, "{}", udid),
        }
    }
}

impl From<DeviceId> for DeviceRef {
    fn from(id: DeviceId) -> Self {
        DeviceRef::Id(id)
    }
}

impl From<Udid> for DeviceRef {
    fn from(udid: Udid) -> Self {
        DeviceRef::Udid(udid)
    }
}

impl From<&Udid> for DeviceRef {
    fn from(udid: &Udid) -> Self {
        DeviceRef::Udid(udid.clone())
    }
}

impl From<&str> for DeviceRef {
    fn from(s: &str) -> Self {
        DeviceRef::Udid(Udid::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::new(42);
        assert_eq!(format!("{}", id), "device-42");
    }

    #[test]
    fn test_device_ref_from_str_is_udid() {
        let r = DeviceRef::from("00008030-001A2B3C4D5E");
        assert_eq!(r, DeviceRef::Udid(Udid::new("00008030-001A2B3C4D5E")));
        assert_eq!(r.to_string(), "00008030-001A2B3C4D5E");
    }
}
