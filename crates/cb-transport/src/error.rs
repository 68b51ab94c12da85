use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("operation timed out before the deadline")]
    TimedOut,
    #[error("operation was cancelled")]
    Cancelled,
    #[error("stream is closed")]
    Closed,
    #[error("dns resolution failed for {host}: {source}")]
    Resolve { host: String, #[source] source: std::io::Error },
    #[error("no addresses resolved for {0}")]
    NoAddresses(String),
    #[error("tls handshake failed: {0}")]
    Tls(#[source] std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
