use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::TransportError;

/// Configuration for the relay service port and LAN discovery.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use offgrid_transport::TransportConfig;
/// use std::time::Duration;
///
/// let config = TransportConfig::new()
///     .relay_port(9100)
///     .beacon_interval(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address the relay listener binds to.
    pub(crate) bind_ip: IpAddr,
    /// TCP port of the relay service. `0` picks an ephemeral port.
    pub(crate) relay_port: u16,
    /// Service name carried in discovery beacons. Beacons for other services are ignored.
    pub(crate) service_name: String,
    pub(crate) multicast_group: Ipv4Addr,
    pub(crate) multicast_port: u16,
    /// How often this node announces itself (and re-offers static peers).
    pub(crate) beacon_interval: Duration,
    pub(crate) connect_timeout: Duration,
    /// Maximum length of one wire frame in bytes.
    pub(crate) max_frame_size: usize,
    /// Multicast discovery on/off. Static peers are offered either way.
    pub(crate) discovery: bool,
    pub(crate) static_peers: Vec<SocketAddr>,
    /// Capacity of the discovered-peer feed.
    pub(crate) feed_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    ///
    /// `OFFGRID_RELAY_PORT` overrides the relay port and `OFFGRID_STATIC_PEERS`
    /// (comma-separated `ip:port` list) seeds the static peer list. Unparseable
    /// values are ignored with a warning.
    pub fn new() -> Self {
        let relay_port = std::env::var("OFFGRID_RELAY_PORT")
            .ok()
            .and_then(|s| match s.parse() {
                Ok(port) => Some(port),
                Err(_) => {
                    tracing::warn!("ignoring invalid OFFGRID_RELAY_PORT={s:?}");
                    None
                }
            })
            .unwrap_or(crate::DEFAULT_RELAY_PORT);

        let static_peers = std::env::var("OFFGRID_STATIC_PEERS")
            .ok()
            .map(|s| parse_peer_list(&s))
            .unwrap_or_default();

        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            relay_port,
            service_name: crate::SERVICE_NAME.to_string(),
            multicast_group: Ipv4Addr::new(239, 255, 77, 77),
            multicast_port: 9001,
            beacon_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            max_frame_size: 1024 * 1024, // 1 MiB
            discovery: true,
            static_peers,
            feed_capacity: 64,
        }
    }

    /// Set the address the relay listener binds to (default: `0.0.0.0`).
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Set the relay service port (default: 9000).
    pub fn relay_port(mut self, port: u16) -> Self {
        self.relay_port = port;
        self
    }

    /// Set the discovery service name (default: `offgrid-relay`).
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the multicast group and port used for beacons (default: `239.255.77.77:9001`).
    pub fn multicast(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.multicast_group = group;
        self.multicast_port = port;
        self
    }

    /// Set the beacon interval (default: 5 s).
    pub fn beacon_interval(mut self, interval: Duration) -> Self {
        self.beacon_interval = interval;
        self
    }

    /// Set the outbound connect timeout (default: 10 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum frame size (default: 1 MiB).
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Enable or disable multicast discovery (default: enabled).
    ///
    /// ```rust
    /// use offgrid_transport::TransportConfig;
    ///
    /// let config = TransportConfig::new()
    ///     .discovery(false)
    ///     .static_peer("192.168.1.20:9000".parse().unwrap());
    /// ```
    pub fn discovery(mut self, enabled: bool) -> Self {
        self.discovery = enabled;
        self
    }

    /// Add a peer that is offered to the feed on every beacon tick.
    pub fn static_peer(mut self, addr: SocketAddr) -> Self {
        if !self.static_peers.contains(&addr) {
            self.static_peers.push(addr);
        }
        self
    }

    /// Set the capacity of the discovered-peer feed (default: 64).
    pub fn feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity;
        self
    }

    /// Socket address the relay listener binds to.
    pub fn relay_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.relay_port)
    }

    pub fn service(&self) -> &str {
        &self.service_name
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame_size
    }

    pub fn static_peers(&self) -> &[SocketAddr] {
        &self.static_peers
    }

    /// Outbound connect timeout.
    pub fn dial_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Check the values that would otherwise fail deep inside a task.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.service_name.is_empty() {
            return Err(TransportError::Config("service name is empty".into()));
        }
        if !self.multicast_group.is_multicast() {
            return Err(TransportError::Config(format!(
                "{} is not a multicast address",
                self.multicast_group
            )));
        }
        if self.beacon_interval.is_zero() {
            return Err(TransportError::Config("beacon interval is zero".into()));
        }
        if self.max_frame_size < crate::PROTOCOL_ID.len() {
            return Err(TransportError::Config(format!(
                "max frame size {} is below the protocol line",
                self.max_frame_size
            )));
        }
        if self.feed_capacity == 0 {
            return Err(TransportError::Config("feed capacity is zero".into()));
        }
        Ok(())
    }
}

/// Parse a comma-separated list of socket addresses, skipping invalid entries.
pub fn parse_peer_list(s: &str) -> Vec<SocketAddr> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                tracing::warn!("ignoring invalid static peer {entry:?}");
                None
            }
        })
        .collect()
}
