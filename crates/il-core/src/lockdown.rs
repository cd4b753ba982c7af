//! Lockdown session client
//!
//! Lockdown is the device's control service. A [`LockdownClient`] opens a
//! tunnel to it, starts an authenticated session using the pairing record
//! and, when the device asks for it, upgrades that same connection to TLS.
//! From there it can read device metadata or activate feature services.
//!
//! [`open_service_connection`] is the composite every feature client uses:
//! session, `StartService`, a fresh tunnel to the returned port, and the
//! service's own TLS handshake.

use std::fmt;

use bytes::Bytes;
use il_protocol::document;
use il_protocol::lockdown::{
    DeviceValuesResponse, GetValueResponse, QueryTypeResponse, StartServiceResponse,
    StartSessionResponse, StatusResponse,
};
use il_protocol::{
    DeviceValues, LockdownRequest, LockdownResponse, PairRecord, Udid, Value, LOCKDOWN_PORT,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::client::FramedClient;
use crate::error::{LockdownError, Result};
use crate::traits::DeviceConnector;

/// `QueryType` answer from a genuine lockdown service
pub const LOCKDOWN_SERVICE_TYPE: &str = "com.apple.mobile.lockdown";

/// Debug server service name
pub const DEBUGSERVER_SERVICE: &str = "com.apple.debugserver";

/// Whether a service drops back to cleartext right after its TLS handshake
///
/// The debug server authenticates the connection with TLS and then speaks
/// the GDB remote protocol unencrypted on the same socket.
pub fn requires_cleartext(service: &str) -> bool {
    service == DEBUGSERVER_SERVICE
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Tunnel open, no session yet
    Connected,
    /// `StartSession` accepted, TLS applied if the device asked for it
    SessionStarted,
    /// Connection shut down
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connected => write!(f, "connected"),
            SessionState::SessionStarted => write!(f, "session started"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// An activated service, ready to be connected to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub port: u16,
    /// Whether the service connection must start with a TLS handshake
    pub enable_tls: bool,
}

/// Default-domain values, typed and raw
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub values: DeviceValues,
    pub raw: Value,
}

/// Control-channel client for lockdown
pub struct LockdownClient {
    client: FramedClient,
    state: SessionState,
    session_id: Option<String>,
    udid: Udid,
    pair_record: PairRecord,
}

impl LockdownClient {
    /// Tunnel to lockdown and start a session
    pub async fn open<C>(connector: &C, udid: &Udid) -> Result<Self>
    where
        C: DeviceConnector + ?Sized,
    {
        let pair_record = connector.pair_record(udid).await?;
        let stream = connector.connect(udid, LOCKDOWN_PORT).await?;
        let client = FramedClient::new(stream).with_device(udid.clone(), Some(pair_record.clone()));

        let mut lockdown = Self::from_client(client, udid.clone(), pair_record);
        lockdown.start_session().await?;
        Ok(lockdown)
    }

    /// Wrap an existing lockdown connection; no session is started
    pub fn from_client(client: FramedClient, udid: Udid, pair_record: PairRecord) -> Self {
        Self {
            client,
            state: SessionState::Connected,
            session_id: None,
            udid,
            pair_record,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn udid(&self) -> &Udid {
        &self.udid
    }

    pub fn pair_record(&self) -> &PairRecord {
        &self.pair_record
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_secure(&self) -> bool {
        self.client.is_secure()
    }

    /// Send `StartSession` with the pairing identity
    pub async fn start_session(&mut self) -> Result<()> {
        self.require(SessionState::Connected, "start a session")?;

        let request = LockdownRequest::StartSession {
            host_id: self.pair_record.host_id.clone(),
            system_buid: self.pair_record.system_buid.clone(),
        };
        let response: StartSessionResponse = self.request(&request).await?;
        self.session_id = response.session_id;

        if response.enable_session_ssl {
            if let Err(e) = self.client.enable_tls(&self.pair_record).await {
                self.state = SessionState::Closed;
                return Err(e);
            }
        }

        self.state = SessionState::SessionStarted;
        debug!(
            udid = %self.udid,
            secure = self.client.is_secure(),
            "Lockdown session started"
        );
        Ok(())
    }

    /// Identify the responder
    pub async fn query_type(&mut self) -> Result<String> {
        self.require_open("query type")?;
        let response: QueryTypeResponse = self.request(&LockdownRequest::QueryType).await?;
        if response.kind != LOCKDOWN_SERVICE_TYPE {
            warn!(kind = %response.kind, "Unexpected lockdown service type");
        }
        Ok(response.kind)
    }

    /// Read one key from the default domain
    ///
    /// A key the device does not report fails with `LockdownError::Device`
    /// carrying the device's error string (usually `MissingValue`).
    pub async fn get_value(&mut self, key: &str) -> Result<Value> {
        self.get_domain_value(None, Some(key)).await
    }

    /// Read a key, a whole domain, or (with neither) the default domain
    pub async fn get_domain_value(
        &mut self,
        domain: Option<&str>,
        key: Option<&str>,
    ) -> Result<Value> {
        self.require_open("read values")?;
        let request = LockdownRequest::GetValue {
            domain: domain.map(str::to_string),
            key: key.map(str::to_string),
        };
        let response: GetValueResponse = self.request(&request).await?;
        Ok(response.value)
    }

    /// Read the whole default domain
    ///
    /// When a well-known key has an unexpected type, `values` is left at its
    /// defaults and only `raw` is populated.
    pub async fn get_values(&mut self) -> Result<DeviceInfo> {
        self.require_open("read values")?;
        let request = LockdownRequest::GetValue {
            domain: None,
            key: None,
        };

        let payload = self.exchange(&request).await?;
        let raw: GetValueResponse = self.decode(&request, &payload)?;
        let values = match document::decode::<DeviceValuesResponse>(&payload) {
            Ok(typed) => typed.value,
            Err(e) => {
                warn!(error = %e, "Device values have unexpected types, keeping only the raw dictionary");
                DeviceValues::default()
            }
        };
        Ok(DeviceInfo {
            values,
            raw: raw.value,
        })
    }

    /// Activate a service and learn its port
    ///
    /// With `with_escrow_bag`, the pairing record's escrow bag is sent too;
    /// some services refuse to start without it.
    pub async fn start_service(
        &mut self,
        service: &str,
        with_escrow_bag: bool,
    ) -> Result<ServiceDescriptor> {
        self.require(SessionState::SessionStarted, "start a service")?;

        let escrow_bag = if with_escrow_bag {
            if self.pair_record.escrow_bag.is_empty() {
                return Err(LockdownError::MissingEscrowBag.into());
            }
            Some(self.pair_record.escrow_bag.clone())
        } else {
            None
        };

        let request = LockdownRequest::StartService {
            service: service.to_string(),
            escrow_bag,
        };
        let response: StartServiceResponse = self.request(&request).await?;
        if response.port == 0 {
            return Err(LockdownError::UnexpectedResponse(format!(
                "StartService for {} returned no port",
                service
            ))
            .into());
        }

        let name = if response.service.is_empty() {
            service.to_string()
        } else {
            response.service
        };
        info!(service = %name, port = response.port, tls = response.enable_service_ssl, "Service started");
        Ok(ServiceDescriptor {
            name,
            port: response.port,
            enable_tls: response.enable_service_ssl,
        })
    }

    /// Reboot the device into recovery mode
    pub async fn enter_recovery(&mut self) -> Result<()> {
        self.require_open("enter recovery")?;
        let _: StatusResponse = self.request(&LockdownRequest::EnterRecovery).await?;
        info!(udid = %self.udid, "Device entering recovery mode");
        Ok(())
    }

    /// End the session but keep the connection
    pub async fn stop_session(&mut self) -> Result<()> {
        self.require(SessionState::SessionStarted, "stop the session")?;
        let Some(session_id) = self.session_id.take() else {
            return Ok(());
        };
        let _: StatusResponse = self
            .request(&LockdownRequest::StopSession { session_id })
            .await?;
        Ok(())
    }

    /// Close the connection; safe to call more than once
    pub async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.client.close().await
    }

    fn require(&self, state: SessionState, operation: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(LockdownError::InvalidState {
                operation,
                state: self.state.to_string(),
            }
            .into())
        }
    }

    fn require_open(&self, operation: &'static str) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(LockdownError::InvalidState {
                operation,
                state: self.state.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn request<R>(&mut self, request: &LockdownRequest) -> Result<R>
    where
        R: DeserializeOwned + LockdownResponse,
    {
        let payload = self.exchange(request).await?;
        self.decode(request, &payload)
    }

    /// Send and receive; any transport failure leaves the client closed
    async fn exchange(&mut self, request: &LockdownRequest) -> Result<Bytes> {
        debug!(request = request.name(), "Sending lockdown request");
        let result = match self.client.send(request).await {
            Ok(()) => self.client.recv_bytes().await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.state = SessionState::Closed;
            let _ = self.client.close().await;
        }
        result
    }

    fn decode<R>(&self, request: &LockdownRequest, payload: &[u8]) -> Result<R>
    where
        R: DeserializeOwned + LockdownResponse,
    {
        let response: R = document::decode(payload)?;
        if let Some(error) = response.error() {
            debug!(request = request.name(), error, "Lockdown request rejected");
            return Err(LockdownError::Device {
                request: request.name(),
                error: error.to_string(),
            }
            .into());
        }
        Ok(response)
    }
}

impl fmt::Debug for LockdownClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockdownClient")
            .field("udid", &self.udid)
            .field("state", &self.state)
            .field("secure", &self.client.is_secure())
            .finish()
    }
}

/// Start `service` on the device and connect to it
///
/// The lockdown connection used to start the service is abandoned once the
/// service port is known. The returned client is already past the service's
/// TLS handshake (and back in cleartext for services that require it).
pub async fn open_service_connection<C>(
    connector: &C,
    udid: &Udid,
    service: &str,
    with_escrow_bag: bool,
) -> Result<FramedClient>
where
    C: DeviceConnector + ?Sized,
{
    let descriptor = {
        let mut lockdown = LockdownClient::open(connector, udid).await?;
        lockdown.start_service(service, with_escrow_bag).await?
    };

    let pair_record = connector.pair_record(udid).await?;
    let stream = connector.connect(udid, descriptor.port).await?;
    let mut client = FramedClient::new(stream).with_device(udid.clone(), Some(pair_record.clone()));

    if descriptor.enable_tls {
        client.enable_tls(&pair_record).await?;
        if requires_cleartext(service) {
            client.disable_tls()?;
            debug!(service, "Service continues in cleartext");
        }
    }

    Ok(client)
}
