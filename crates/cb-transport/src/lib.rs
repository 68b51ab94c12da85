//! Uniform async byte-stream abstraction over plain TCP and TLS (spec §4.2).
//!
//! Every [`Stream`] implementation serialises its own I/O onto an internal
//! `tokio::sync::Mutex` so callers never observe overlapping reads or writes
//! on the same connection — callers on foreign threads simply await the same
//! async methods rather than posting to a private executor, which is the
//! idiomatic tokio equivalent of a strand.

pub mod error;
pub mod options;
pub mod tcp;
pub mod tls;

pub use error::{TransportError, TransportResult};
pub use options::SocketOptions;

use async_trait::async_trait;
use cb_core::Deadline;
use std::net::SocketAddr;

/// A single TCP- or TLS-backed byte stream (spec §4.2).
///
/// `async_connect` establishes the TCP connection and, for TLS streams,
/// also performs the client handshake before returning. Cancellation (a
/// deadline that elapses mid-operation) is reported as
/// [`TransportError::TimedOut`] or [`TransportError::Cancelled`] and must
/// never be mistaken for success.
#[async_trait]
pub trait Stream: Send + Sync {
    fn is_open(&self) -> bool;

    /// Whether this stream is TLS-protected, so SASL mechanism selection can
    /// enforce "PLAIN is forbidden on non-TLS unless explicitly allowed"
    /// (spec §4.3) without guessing.
    fn is_tls(&self) -> bool;

    async fn close(&self) -> TransportResult<()>;

    fn set_options(&self, options: SocketOptions) -> TransportResult<()>;

    /// Write the full contents of `buf`, returning the number of bytes
    /// written (always `buf.len()` on success — short writes are retried
    /// internally).
    async fn write_all(&self, buf: &[u8], deadline: Deadline) -> TransportResult<usize>;

    /// Read at least one byte into `buf`, returning the number of bytes
    /// read, or `Ok(0)` on a clean peer-initiated close.
    async fn read_some(&self, buf: &mut [u8], deadline: Deadline) -> TransportResult<usize>;

    fn peer_addr(&self) -> Option<SocketAddr>;
}

pub(crate) async fn with_deadline<T>(
    deadline: Deadline,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> TransportResult<T> {
    if deadline.is_expired() {
        return Err(TransportError::TimedOut);
    }
    match tokio::time::timeout(deadline.remaining(), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(io_err)) => Err(TransportError::Io(io_err)),
        Err(_) => Err(TransportError::TimedOut),
    }
}
