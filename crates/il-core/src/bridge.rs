//! Byte-for-byte bridging between two streams
//!
//! [`bridge`] spawns one copy task per direction. The first task to stop
//! (EOF, error, or cancellation) cancels the other; each task shuts down the
//! write half it owns and drops its halves, so both streams end up closed.
//! Nothing is inspected or rewritten on the way through.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::stream::BoxedStream;

/// Copy buffer per direction
const BUFFER_SIZE: usize = 32 * 1024;

/// Bytes moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Handle to a running bridge
#[derive(Debug)]
pub struct BridgeHandle {
    cancel: CancellationToken,
    a_to_b: JoinHandle<u64>,
    b_to_a: JoinHandle<u64>,
}

impl BridgeHandle {
    /// Stop both directions and close both streams
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether both copy tasks have finished
    pub fn is_finished(&self) -> bool {
        self.a_to_b.is_finished() && self.b_to_a.is_finished()
    }

    /// Wait for both directions to finish
    pub async fn join(self) -> BridgeStats {
        let a_to_b = self.a_to_b.await.unwrap_or_else(|e| {
            warn!(error = %e, "Bridge task failed");
            0
        });
        let b_to_a = self.b_to_a.await.unwrap_or_else(|e| {
            warn!(error = %e, "Bridge task failed");
            0
        });
        BridgeStats { a_to_b, b_to_a }
    }
}

/// Connect `a` and `b` until either side closes
pub fn bridge<A, B>(a: A, b: B) -> BridgeHandle
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let cancel = CancellationToken::new();
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let a_to_b = tokio::spawn(pump(a_read, b_write, cancel.clone(), "a->b"));
    let b_to_a = tokio::spawn(pump(b_read, a_write, cancel.clone(), "b->a"));

    BridgeHandle {
        cancel,
        a_to_b,
        b_to_a,
    }
}

async fn pump<R, W>(mut reader: R, mut writer: W, cancel: CancellationToken, direction: &'static str) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    trace!(direction, "EOF");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(direction, error = %e, "Read failed");
                    break;
                }
            },
        };

        let written = tokio::select! {
            _ = cancel.cancelled() => break,
            result = async {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await
            } => result,
        };
        if let Err(e) = written {
            debug!(direction, error = %e, "Write failed");
            break;
        }
        total += n as u64;
    }

    // Either direction ending tears the whole bridge down
    cancel.cancel();
    if let Err(e) = writer.shutdown().await {
        trace!(direction, error = %e, "Shutdown failed");
    }
    debug!(direction, bytes = total, "Bridge direction finished");
    total
}

/// Source of accepted connections for [`serve_proxy`]
#[async_trait]
trait Incoming: Send + Sync {
    async fn next(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Incoming for TcpListener {
    async fn next(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Pause after a failed accept; errors like EMFILE persist until a socket closes
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Accept local TCP connections and bridge each to a fresh remote stream
///
/// `connect` is called once per accepted connection. A failed connect drops
/// only that local connection, and a failed accept is logged and retried.
/// Runs until `shutdown` is cancelled.
pub async fn serve_proxy<F, Fut>(
    listener: TcpListener,
    connect: F,
    shutdown: CancellationToken,
) -> Result<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxedStream>> + Send + 'static,
{
    serve_incoming(listener, connect, shutdown).await
}

async fn serve_incoming<I, F, Fut>(
    incoming: I,
    connect: F,
    shutdown: CancellationToken,
) -> Result<()>
where
    I: Incoming,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxedStream>> + Send + 'static,
{
    let connect = Arc::new(connect);
    let local_addr = incoming.local_addr()?;
    info!(addr = %local_addr, "Proxy listening");

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(addr = %local_addr, "Proxy shutting down");
                return Ok(());
            }
            accepted = incoming.next() => accepted,
        };

        let (socket, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(addr = %local_addr, error = %e, "Failed to accept connection");
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
                continue;
            }
        };

        let connect = Arc::clone(&connect);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            handle_proxy_connection(socket, peer, connect.as_ref(), shutdown).await;
        });
    }
}

async fn handle_proxy_connection<F, Fut>(
    socket: TcpStream,
    peer: SocketAddr,
    connect: &F,
    shutdown: CancellationToken,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<BoxedStream>>,
{
    if let Err(e) = socket.set_nodelay(true) {
        trace!(error = %e, "Failed to set TCP_NODELAY");
    }

    let remote = match connect().await {
        Ok(remote) => remote,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Failed to open remote side");
            return;
        }
    };

    info!(peer = %peer, "Bridging connection");
    let handle = bridge(socket, remote);
    tokio::select! {
        _ = shutdown.cancelled() => handle.cancel(),
        _ = wait_finished(&handle) => {}
    }
    let stats = handle.join().await;
    info!(peer = %peer, sent = stats.a_to_b, received = stats.b_to_a, "Connection closed");
}

async fn wait_finished(handle: &BridgeHandle) {
    handle.cancel.cancelled().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::boxed;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_remote() -> Result<BoxedStream> {
        let (near, mut far) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                match far.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if far.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(boxed(near))
    }

    /// Fails the first `failures` accepts with EMFILE, then behaves
    struct FlakyListener {
        inner: TcpListener,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Incoming for FlakyListener {
        async fn next(&self) -> io::Result<(TcpStream, SocketAddr)> {
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(io::Error::from_raw_os_error(24));
            }
            self.inner.accept().await
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.inner.local_addr()
        }
    }

    #[tokio::test]
    async fn test_bytes_pass_through_unchanged() {
        let (mut left, a) = tokio::io::duplex(1024);
        let (b, mut right) = tokio::io::duplex(1024);
        let handle = bridge(a, b);

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            left.write_all(&payload).await.unwrap();
            left
        });

        let mut received = vec![0u8; expected.len()];
        right.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        let left = writer.await.unwrap();
        drop(left);
        let stats = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
        assert_eq!(stats.a_to_b, expected.len() as u64);
        assert_eq!(stats.b_to_a, 0);
    }

    #[tokio::test]
    async fn test_closing_one_end_closes_the_other() {
        let (left, a) = tokio::io::duplex(1024);
        let (b, mut right) = tokio::io::duplex(1024);
        let _handle = bridge(a, b);

        drop(left);

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), right.read(&mut buf))
            .await
            .expect("other end should observe closure")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_both_directions() {
        let (_left, a) = tokio::io::duplex(1024);
        let (b, mut right) = tokio::io::duplex(1024);
        let handle = bridge(a, b);

        handle.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
        assert_eq!(stats, BridgeStats::default());

        let mut buf = [0u8; 1];
        assert_eq!(right.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_serve_proxy_bridges_each_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        // Remote side: an echo peer per connection
        let proxy = tokio::spawn(serve_proxy(
            listener,
            || async { echo_remote() },
            shutdown.clone(),
        ));

        for round in 0..3u8 {
            let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
            let message = [round; 10];
            client.write_all(&message).await.unwrap();
            let mut echoed = [0u8; 10];
            client.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, message);
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), proxy)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_proxy_drops_connection_when_remote_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let proxy = tokio::spawn(serve_proxy(
            listener,
            || async {
                Err::<BoxedStream, _>(crate::error::LinkError::ConnectionRefused(
                    "port 1234".to_string(),
                ))
            },
            shutdown.clone(),
        ));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        shutdown.cancel();
        proxy.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_proxy_survives_accept_errors() {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = inner.local_addr().unwrap();
        let incoming = FlakyListener {
            inner,
            failures: AtomicUsize::new(3),
        };
        let shutdown = CancellationToken::new();

        let proxy = tokio::spawn(serve_incoming(
            incoming,
            || async { echo_remote() },
            shutdown.clone(),
        ));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(b"still here").await.unwrap();
        let mut echoed = [0u8; 10];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&echoed, b"still here");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), proxy)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
