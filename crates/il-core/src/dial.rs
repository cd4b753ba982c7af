//! Address → stream resolution
//!
//! Addresses look like `scheme://authority/path`. A registry maps schemes to
//! dialers; schemes without a registered dialer are treated as transport
//! names (`tcp`, `tcp4`, `tcp6`, `unix`) with the remainder as host or path.
//! The registry is an ordinary value, passed to whoever needs to dial.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{DialError, Result};
use crate::stream::{boxed, BoxedStream};

/// Parsed dial address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    /// Scheme, lowercased (`tcp` when the address had none)
    pub scheme: String,
    /// Host, host:port, or an opaque authority such as `UDID:PORT`
    pub authority: String,
    /// Path component, including its leading slash
    pub path: String,
}

impl DialTarget {
    /// Parse an address string
    pub fn parse(address: &str) -> Result<Self, DialError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(DialError::InvalidAddress("empty address".to_string()));
        }

        let Some((scheme, rest)) = address.split_once("://") else {
            return Ok(Self {
                scheme: "tcp".to_string(),
                authority: address.to_string(),
                path: String::new(),
            });
        };

        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(DialError::InvalidAddress(address.to_string()));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            authority: authority.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
    }
}

/// A scheme handler
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &DialTarget) -> Result<BoxedStream>;
}

#[async_trait]
impl<F, Fut> Dialer for F
where
    F: Fn(DialTarget) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BoxedStream>> + Send,
{
    async fn dial(&self, target: &DialTarget) -> Result<BoxedStream> {
        (self)(target.clone()).await
    }
}

/// Scheme → dialer table
#[derive(Clone, Default)]
pub struct DialRegistry {
    dialers: HashMap<String, Arc<dyn Dialer>>,
    connect_timeout: Option<Duration>,
}

impl DialRegistry {
    /// Create a registry with only the built-in transports
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every dial by `timeout`; established streams are not affected
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Register (or replace) the dialer for a scheme
    pub fn register<D: Dialer + 'static>(&mut self, scheme: &str, dialer: D) {
        self.dialers
            .insert(scheme.to_ascii_lowercase(), Arc::new(dialer));
    }

    /// Whether a custom dialer is registered for `scheme`
    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.dialers.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Resolve an address to a connected stream
    pub async fn dial(&self, address: &str) -> Result<BoxedStream> {
        let target = DialTarget::parse(address)?;
        tracing::debug!(target = %target, "Dialing");

        let fut = self.dial_target(&target);
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("dialing {} timed out after {:?}", target, limit),
                )
            })?,
            None => fut.await,
        }
    }

    async fn dial_target(&self, target: &DialTarget) -> Result<BoxedStream> {
        if let Some(dialer) = self.dialers.get(&target.scheme) {
            return dialer.dial(target).await;
        }
        dial_transport(target).await
    }
}

impl fmt::Debug for DialRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.dialers.keys().collect();
        schemes.sort();
        f.debug_struct("DialRegistry")
            .field("schemes", &schemes)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Fallback: treat the scheme as a transport name
async fn dial_transport(target: &DialTarget) -> Result<BoxedStream> {
    match target.scheme.as_str() {
        "tcp" | "tcp4" | "tcp6" => {
            if target.authority.is_empty() {
                return Err(DialError::InvalidAddress(target.to_string()).into());
            }
            let stream = connect_tcp(&target.scheme, &target.authority).await?;
            stream.set_nodelay(true)?;
            Ok(boxed(stream))
        }
        #[cfg(unix)]
        "unix" => {
            // unix:///path, or unix://relative/path when written sloppily
            let path = if target.authority.is_empty() {
                target.path.clone()
            } else {
                format!("{}{}", target.authority, target.path)
            };
            if path.is_empty() {
                return Err(DialError::InvalidAddress(target.to_string()).into());
            }
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(boxed(stream))
        }
        other => Err(DialError::UnsupportedScheme(other.to_string()).into()),
    }
}

/// Connect to the first reachable address; `tcp4`/`tcp6` restrict the family
async fn connect_tcp(scheme: &str, authority: &str) -> Result<TcpStream> {
    let family = match scheme {
        "tcp4" => Some("IPv4"),
        "tcp6" => Some("IPv6"),
        _ => None,
    };
    let wanted = |addr: &SocketAddr| match family {
        Some("IPv4") => addr.is_ipv4(),
        Some(_) => addr.is_ipv6(),
        None => true,
    };

    let mut last_error = None;
    for addr in tokio::net::lookup_host(authority).await?.filter(wanted) {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) => Err(e.into()),
        None => Err(DialError::NoAddress {
            family: family.unwrap_or("IP"),
            host: authority.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_parse_unix_address() {
        let target = DialTarget::parse("unix:///var/run/usbmuxd").unwrap();
        assert_eq!(target.scheme, "unix");
        assert_eq!(target.authority, "");
        assert_eq!(target.path, "/var/run/usbmuxd");
    }

    #[test]
    fn test_parse_authority_with_port() {
        let target = DialTarget::parse("usbmux://00008030-001A:62078").unwrap();
        assert_eq!(target.scheme, "usbmux");
        assert_eq!(target.authority, "00008030-001A:62078");
        assert_eq!(target.path, "");
    }

    #[test]
    fn test_parse_bare_host_port() {
        let target = DialTarget::parse("127.0.0.1:27015").unwrap();
        assert_eq!(target.scheme, "tcp");
        assert_eq!(target.authority, "127.0.0.1:27015");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DialTarget::parse("").is_err());
        assert!(DialTarget::parse("://nope").is_err());
        assert!(DialTarget::parse("bad scheme://x").is_err());
    }

    #[tokio::test]
    async fn test_registered_scheme_wins() {
        let mut registry = DialRegistry::new();
        registry.register("mem", |target: DialTarget| async move {
            let (client, mut server) = tokio::io::duplex(64);
            server.write_all(target.authority.as_bytes()).await?;
            Ok(boxed(client))
        });
        assert!(registry.has_scheme("MEM"));

        let mut stream = registry.dial("mem://hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_fallback_tcp_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"ok").await.unwrap();
        });

        let registry = DialRegistry::new();
        let mut stream = registry.dial(&format!("tcp://{}", addr)).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_family_restriction() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"v4").await.unwrap();
        });

        let registry = DialRegistry::new();
        let err = match registry.dial(&format!("tcp6://{}", addr)).await {
            Ok(_) => panic!("an IPv4 literal has no IPv6 address"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            LinkError::Dial(DialError::NoAddress { family: "IPv6", .. })
        ));

        let mut stream = registry.dial(&format!("tcp4://{}", addr)).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"v4");
        accept.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fallback_unix_transport() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mux.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let accept = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"unix").await.unwrap();
        });

        let registry = DialRegistry::new();
        let mut stream = registry
            .dial(&format!("unix://{}", path.display()))
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"unix");
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_rejected() {
        let registry = DialRegistry::new();
        let err = match registry.dial("carrier-pigeon://coop").await {
            Ok(_) => panic!("dial should fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            LinkError::Dial(DialError::UnsupportedScheme(ref s)) if s == "carrier-pigeon"
        ));
    }

    #[tokio::test]
    async fn test_refused_tcp_is_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registry = DialRegistry::new();
        let err = match registry.dial(&addr.to_string()).await {
            Ok(_) => panic!("dial should fail"),
            Err(e) => e,
        };
        assert!(err.is_connection_refused());
    }
}
