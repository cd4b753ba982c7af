//! il-core: usbmuxd, lockdown and service connections for ilink
//!
//! This crate dials the usbmuxd daemon, turns daemon connections into
//! tunnels to device-side ports, negotiates lockdown sessions (with TLS from
//! the pairing record) and hands out framed clients for individual services.

pub mod bridge;
pub mod client;
pub mod config;
pub mod context;
pub mod device_link;
pub mod dial;
pub mod error;
mod framing;
pub mod lockdown;
pub mod stream;
pub mod tls;
pub mod traits;
pub mod usbmux;

pub use bridge::{bridge, serve_proxy, BridgeHandle, BridgeStats};
pub use client::FramedClient;
pub use config::LinkConfig;
pub use context::LinkContext;
pub use dial::{DialRegistry, DialTarget, Dialer};
pub use error::{LinkError, Result};
pub use lockdown::{open_service_connection, DeviceInfo, LockdownClient, ServiceDescriptor, SessionState};
pub use stream::{boxed, AsyncStream, BoxedStream};
pub use traits::DeviceConnector;
pub use usbmux::{ClientIdentity, MuxConnection};
