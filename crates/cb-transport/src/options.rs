use std::time::Duration;

/// Socket-level options a caller can request through [`crate::Stream::set_options`]
/// (spec §4.2: `set_options` "enables TCP_NODELAY and keepalive").
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    pub tcp_nodelay: bool,
    pub tcp_keepalive: Option<Duration>,
}

impl SocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.tcp_keepalive = interval;
        self
    }
}
