//! Core error types for ilink

use il_protocol::{ProtocolError, ResultCode};
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Top-level error type for the ilink stack
///
/// Every layer aborts the current connection attempt on error; nothing in
/// here is retried automatically.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Malformed document or short frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Dial, read, write or close failure, surfaced verbatim
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown device or missing pairing record
    #[error("Not found: {0}")]
    NotFound(String),

    /// usbmuxd refused the tunnel (device-side port closed)
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// usbmuxd error
    #[error("usbmuxd error: {0}")]
    Mux(#[from] MuxError),

    /// Lockdown error
    #[error("Lockdown error: {0}")]
    Lockdown(#[from] LockdownError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Address resolution error
    #[error("Dial error: {0}")]
    Dial(#[from] DialError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The client's connection was closed or lost mid-handshake
    #[error("Not connected")]
    NotConnected,
}

impl LinkError {
    /// Whether this error means "no such device / no pairing record"
    pub fn is_not_found(&self) -> bool {
        matches!(self, LinkError::NotFound(_))
    }

    /// Whether this error is equivalent to a TCP connection refusal
    pub fn is_connection_refused(&self) -> bool {
        match self {
            LinkError::ConnectionRefused(_) => true,
            LinkError::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }

    /// Whether this error came from a malformed payload
    pub fn is_decode(&self) -> bool {
        matches!(self, LinkError::Protocol(_))
    }
}

/// usbmuxd-related errors
#[derive(Error, Debug)]
pub enum MuxError {
    /// The daemon answered with a non-zero result code
    #[error("{request} failed: {code}")]
    Result {
        request: &'static str,
        code: ResultCode,
    },

    /// The daemon answered with something other than what was asked for
    #[error("Unexpected response to {request}: {detail}")]
    UnexpectedResponse {
        request: &'static str,
        detail: String,
    },
}

/// Lockdown-related errors
#[derive(Error, Debug)]
pub enum LockdownError {
    /// The device reported an `Error` for a request
    #[error("{request} rejected by device: {error}")]
    Device {
        request: &'static str,
        error: String,
    },

    /// Operation attempted in the wrong session state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// A response did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The service needs the escrow bag but the pair record has none
    #[error("Pair record has no escrow bag")]
    MissingEscrowBag,
}

/// TLS-related errors
#[derive(Error, Debug)]
pub enum TlsError {
    /// Pairing record lacks the host certificate or key
    #[error("Pair record has no {0}")]
    MissingMaterial(&'static str),

    /// PEM block could not be parsed
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),

    /// Private key uses an encoding rustls cannot load
    #[error("Unsupported private key type: {0}")]
    UnsupportedKey(String),

    /// rustls rejected the configuration
    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),

    /// The handshake failed; the underlying socket has been dropped
    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),
}

/// Address resolution errors
#[derive(Error, Debug)]
pub enum DialError {
    /// Address could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No handler and no matching transport for this scheme
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Host resolved, but not to an address of the requested family
    #[error("No {family} address for {host}")]
    NoAddress { family: &'static str, host: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_refused_classification() {
        let refused = LinkError::ConnectionRefused("port 1234".to_string());
        assert!(refused.is_connection_refused());

        let io = LinkError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(io.is_connection_refused());

        let other = LinkError::NotFound("DEADBEEF".to_string());
        assert!(!other.is_connection_refused());
        assert!(other.is_not_found());
    }

    #[test]
    fn test_mux_error_display() {
        let err = MuxError::Result {
            request: "Connect",
            code: ResultCode::BadDevice,
        };
        assert_eq!(err.to_string(), "Connect failed: bad device");
    }
}
