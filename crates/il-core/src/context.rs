//! Per-invocation context: how to dial, which device to use
//!
//! A [`LinkContext`] is built once from a [`LinkConfig`] and handed to
//! whatever needs the daemon. Every operation opens its own daemon
//! connection; device IDs and the selected device are looked up again on
//! each call.

use std::sync::Arc;

use async_trait::async_trait;
use il_protocol::{PairRecord, Udid};
use tracing::debug;

use crate::client::FramedClient;
use crate::config::LinkConfig;
use crate::dial::DialRegistry;
use crate::error::{LinkError, Result};
use crate::lockdown::{open_service_connection, LockdownClient};
use crate::stream::BoxedStream;
use crate::traits::DeviceConnector;
use crate::usbmux::{register_scheme, MuxConnection};

/// Dial registry plus configuration
#[derive(Debug, Clone)]
pub struct LinkContext {
    registry: Arc<DialRegistry>,
    config: LinkConfig,
}

impl LinkContext {
    /// Build the default registry for `config`
    ///
    /// The registry carries the configured connect timeout and the
    /// `usbmux://UDID:PORT` scheme pointed at the configured daemon.
    pub fn new(config: LinkConfig) -> Self {
        let mut registry = DialRegistry::new();
        if let Some(timeout) = config.connect_timeout() {
            registry = registry.with_connect_timeout(timeout);
        }
        register_scheme(&mut registry, config.mux_address.clone());
        Self::with_registry(config, registry)
    }

    /// Use a caller-built registry
    pub fn with_registry(config: LinkConfig, registry: DialRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn registry(&self) -> &DialRegistry {
        &self.registry
    }

    /// A fresh daemon connection
    pub async fn mux(&self) -> Result<MuxConnection> {
        let mux = MuxConnection::dial(&self.registry, &self.config.mux_address).await?;
        Ok(mux.with_identity(self.config.identity()))
    }

    /// The configured device, or the first attached one
    pub async fn select_device(&self) -> Result<Udid> {
        if let Some(udid) = self.config.udid() {
            return Ok(udid);
        }

        let devices = self.mux().await?.list_devices().await?;
        let udid = devices
            .iter()
            .find_map(|d| d.stable_id())
            .ok_or_else(|| LinkError::NotFound("no devices attached".to_string()))?;
        debug!(udid = %udid, attached = devices.len(), "Selected first attached device");
        Ok(udid)
    }

    /// Lockdown session with `udid`
    pub async fn lockdown(&self, udid: &Udid) -> Result<LockdownClient> {
        LockdownClient::open(self, udid).await
    }

    /// Start `service` on `udid` and connect to it
    pub async fn open_service(
        &self,
        udid: &Udid,
        service: &str,
        with_escrow_bag: bool,
    ) -> Result<FramedClient> {
        open_service_connection(self, udid, service, with_escrow_bag).await
    }
}

#[async_trait]
impl DeviceConnector for LinkContext {
    async fn pair_record(&self, udid: &Udid) -> Result<PairRecord> {
        let mux = self.mux().await?;
        let record = mux.read_pair_record(udid).await?;
        mux.close();
        Ok(record)
    }

    async fn connect(&self, udid: &Udid, port: u16) -> Result<BoxedStream> {
        self.mux().await?.connect(udid.clone(), port).await
    }
}
