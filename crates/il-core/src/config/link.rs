//! Connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use il_protocol::Udid;

use crate::usbmux::{default_mux_address, ClientIdentity};

/// Environment variable naming the daemon address in dial syntax
pub const MUX_ADDRESS_ENV: &str = "ILINK_MUX_ADDRESS";

/// Environment variable understood by other usbmuxd clients
///
/// Accepts `UNIX:/path/to/socket`, `host:port`, or a full dial address.
pub const USBMUXD_SOCKET_ENV: &str = "USBMUXD_SOCKET_ADDRESS";

/// `ProgName` used when the config leaves it unset
pub const DEFAULT_PROG_NAME: &str = "ilink";

/// How to reach the daemon and which device to talk to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Daemon address, e.g. `unix:///var/run/usbmuxd` or `tcp://127.0.0.1:27015`
    pub mux_address: String,

    /// Device to use; the first attached device when unset
    pub udid: Option<String>,

    /// `ProgName` sent with daemon requests; `ilink` when unset, omitted
    /// when empty
    pub prog_name: Option<String>,

    /// `ClientVersionString` sent with daemon requests
    pub client_version: Option<String>,

    /// Upper bound on establishing any connection (0 disables it)
    #[serde(with = "super::serde_utils::duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mux_address: default_mux_address(),
            udid: None,
            prog_name: None,
            client_version: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl LinkConfig {
    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; `ILINK_MUX_ADDRESS` wins over
    /// `USBMUXD_SOCKET_ADDRESS`
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(address) = non_empty(MUX_ADDRESS_ENV) {
            self.mux_address = address.trim().to_string();
        } else if let Some(address) = non_empty(USBMUXD_SOCKET_ENV) {
            self.mux_address = normalize_socket_address(address.trim());
        }
    }

    /// Configured device, if any
    pub fn udid(&self) -> Option<Udid> {
        self.udid
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(Udid::new)
    }

    /// Identification fields for daemon requests
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            prog_name: match self.prog_name.as_deref() {
                None => Some(DEFAULT_PROG_NAME.to_string()),
                Some("") => None,
                Some(name) => Some(name.to_string()),
            },
            client_version: self.client_version.clone(),
        }
    }

    /// Dial timeout, `None` when disabled
    pub fn connect_timeout(&self) -> Option<Duration> {
        (!self.connect_timeout.is_zero()).then_some(self.connect_timeout)
    }
}

/// Convert `USBMUXD_SOCKET_ADDRESS` syntax into a dial address
fn normalize_socket_address(value: &str) -> String {
    if value.contains("://") {
        value.to_string()
    } else if let Some(path) = value.strip_prefix("UNIX:") {
        format!("unix://{}", path)
    } else {
        format!("tcp://{}", value)
    }
}
