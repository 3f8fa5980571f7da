use std::time::Duration;

use offgrid_transport::TransportConfig;

/// Configuration for a [`RelayService`](crate::runtime::RelayService).
///
/// ```rust
/// use offgrid_relay::RelayConfig;
/// use offgrid_transport::TransportConfig;
/// use std::time::Duration;
///
/// let config = RelayConfig::new()
///     .transport(TransportConfig::new().relay_port(0).discovery(false))
///     .handshake_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub transport: TransportConfig,
    /// Upper bound on one handshake, inbound or outbound.
    pub handshake_timeout: Duration,
    /// How long the orchestrator keeps seeking peers for one job.
    pub seek_window: Duration,
    /// Capacity of the [`RelayEvent`](crate::runtime::RelayEvent) channel.
    pub event_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::new(),
            handshake_timeout: Duration::from_secs(30),
            seek_window: Duration::from_secs(300),
            event_buffer: 256,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Set the per-handshake timeout (default: 30 s).
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set how long one job may keep seeking peers (default: 5 min).
    pub fn seek_window(mut self, window: Duration) -> Self {
        self.seek_window = window;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }
}
