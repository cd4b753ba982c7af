//! il-protocol: Wire protocol for ilink
//!
//! This crate defines the framing and message schemas used to talk to the
//! usbmuxd daemon and, through it, to lockdown and per-feature services on
//! an attached device. It performs no I/O of its own.

pub mod codec;
pub mod device;
pub mod document;
pub mod error;
pub mod frame;
pub mod lockdown;
pub mod mux;
pub mod value;

pub use codec::{MuxCodec, MuxFrame, SessionCodec};
pub use device::{DeviceId, DeviceRef, Udid};
pub use error::ProtocolError;
pub use frame::{MuxHeader, MAX_PAYLOAD_SIZE, MUX_HEADER_SIZE, SESSION_PREFIX_SIZE};
pub use lockdown::{DeviceValues, LockdownRequest, LockdownResponse, LOCKDOWN_PORT};
pub use mux::{DeviceAttachment, MuxRequest, PairRecord, ResultCode};
pub use value::{Dictionary, Value};
