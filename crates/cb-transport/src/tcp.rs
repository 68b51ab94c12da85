//! Plain-TCP [`Stream`] implementation, grounded on the teacher's
//! `TcpChannel`: a `tokio::sync::Mutex`-wrapped socket with `socket2` used
//! for options the `tokio` API does not expose directly.

use crate::{error::TransportError, with_deadline, SocketOptions, Stream, TransportResult};
use async_trait::async_trait;
use cb_core::Deadline;
use socket2::SockRef;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::sync::Mutex as AsyncMutex;

pub struct TcpStream {
    inner: AsyncMutex<TokioTcpStream>,
    peer_addr: SocketAddr,
    open: AtomicBool,
}

impl TcpStream {
    pub async fn connect(addr: SocketAddr, deadline: Deadline) -> TransportResult<Self> {
        let stream = with_deadline(deadline, TokioTcpStream::connect(addr)).await?;
        let peer_addr = stream.peer_addr().unwrap_or(addr);
        Ok(Self { inner: AsyncMutex::new(stream), peer_addr, open: AtomicBool::new(true) })
    }

    pub(crate) fn from_tokio(stream: TokioTcpStream, peer_addr: SocketAddr) -> Self {
        Self { inner: AsyncMutex::new(stream), peer_addr, open: AtomicBool::new(true) }
    }
}

#[async_trait]
impl Stream for TcpStream {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_tls(&self) -> bool {
        false
    }

    async fn close(&self) -> TransportResult<()> {
        self.open.store(false, Ordering::Release);
        let mut guard = self.inner.lock().await;
        guard.shutdown().await.map_err(TransportError::Io)
    }

    fn set_options(&self, options: SocketOptions) -> TransportResult<()> {
        let guard = self.inner.try_lock().map_err(|_| TransportError::Closed)?;
        let sock = SockRef::from(&*guard);
        sock.set_tcp_nodelay(options.tcp_nodelay)?;
        sock.set_keepalive(options.tcp_keepalive.is_some())?;
        if let Some(interval) = options.tcp_keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(interval);
            sock.set_tcp_keepalive(&keepalive)?;
        }
        Ok(())
    }

    async fn write_all(&self, buf: &[u8], deadline: Deadline) -> TransportResult<usize> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut guard = self.inner.lock().await;
        with_deadline(deadline, async {
            guard.write_all(buf).await?;
            Ok(buf.len())
        })
        .await
    }

    async fn read_some(&self, buf: &mut [u8], deadline: Deadline) -> TransportResult<usize> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut guard = self.inner.lock().await;
        with_deadline(deadline, guard.read(buf)).await
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_core::Timeout;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_writes_and_reads_a_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let deadline = Timeout::from_millis(1000).deadline_from_now();
        let stream = TcpStream::connect(addr, deadline).await.unwrap();
        stream.write_all(b"hello", deadline).await.unwrap();

        let mut response = [0u8; 5];
        let n = stream.read_some(&mut response, deadline).await.unwrap();
        assert_eq!(&response[..n], b"hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn read_after_close_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await.unwrap();
        });
        let deadline = Timeout::from_millis(1000).deadline_from_now();
        let stream = TcpStream::connect(addr, deadline).await.unwrap();
        stream.close().await.unwrap();
        let mut buf = [0u8; 1];
        let err = stream.read_some(&mut buf, deadline).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
