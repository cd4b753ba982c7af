//! Type-erased byte streams
//!
//! Every layer above the dial registry works on `BoxedStream`, so a
//! unix socket, a TCP socket, an in-memory duplex and a usbmuxd tunnel are
//! interchangeable.

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional async byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

/// Owned, type-erased stream
pub type BoxedStream = Box<dyn AsyncStream>;

/// Box any concrete stream
pub fn boxed<S: AsyncStream + 'static>(stream: S) -> BoxedStream {
    Box::new(stream)
}
