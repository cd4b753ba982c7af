//! Device connector trait

use async_trait::async_trait;
use il_protocol::{PairRecord, Udid};

use crate::error::Result;
use crate::stream::BoxedStream;

/// Source of pairing records and fresh tunnels to device-side ports
///
/// Every call may open a new daemon connection; nothing about the device's
/// numeric handle is remembered between calls.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Pairing record for the device
    async fn pair_record(&self, udid: &Udid) -> Result<PairRecord>;

    /// A new tunnel to `port` on the device
    async fn connect(&self, udid: &Udid, port: u16) -> Result<BoxedStream>;
}
