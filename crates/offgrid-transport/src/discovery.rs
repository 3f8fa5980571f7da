//! LAN peer discovery over IPv4 multicast beacons.
//!
//! Each node multicasts a small JSON [`Beacon`] naming the relay service and
//! the TCP port it listens on. Every beacon heard from another instance is
//! pushed into a bounded [`PeerFeed`] as `source ip : advertised port`. The
//! feed never deduplicates: the same peer shows up again on every interval.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{TransportConfig, TransportError};

/// Announcement multicast by every running relay node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub service: String,
    /// Random per-process id, used to drop our own announcements.
    pub instance: Uuid,
    pub port: u16,
}

impl Beacon {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(TransportError::Serialization)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(data).map_err(TransportError::Deserialization)
    }

    /// Peer address announced by a beacon received from `source`.
    fn peer_addr(&self, source: SocketAddr) -> SocketAddr {
        SocketAddr::new(source.ip(), self.port)
    }
}

/// Pull side of discovery: an endless sequence of candidate relay addresses.
#[derive(Debug)]
pub struct PeerFeed {
    rx: mpsc::Receiver<SocketAddr>,
    tx: mpsc::Sender<SocketAddr>,
    instance: Uuid,
}

impl PeerFeed {
    /// A feed fed only through [`PeerInjector`]s.
    pub fn manual(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            rx,
            tx,
            instance: Uuid::new_v4(),
        }
    }

    /// Wait for the next candidate peer.
    ///
    /// The feed holds its own sender, so this only returns `None` if it is
    /// polled after being closed with [`PeerFeed::close`].
    pub async fn next_peer(&mut self) -> Option<SocketAddr> {
        self.rx.recv().await
    }

    /// Handle for pushing peers into this feed by hand.
    pub fn injector(&self) -> PeerInjector {
        PeerInjector {
            tx: self.tx.clone(),
        }
    }

    /// Instance id carried in this node's beacons.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Stop accepting new peers; queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Push handle into a [`PeerFeed`].
#[derive(Debug, Clone)]
pub struct PeerInjector {
    tx: mpsc::Sender<SocketAddr>,
}

impl PeerInjector {
    /// Queue `addr`, waiting for room in the feed.
    pub async fn add_peer(&self, addr: SocketAddr) -> Result<(), TransportError> {
        self.tx.send(addr).await.map_err(|_| TransportError::Shutdown)
    }

    /// Queue `addr` if there is room. Returns `false` when it was dropped.
    pub fn offer_peer(&self, addr: SocketAddr) -> bool {
        match self.tx.try_send(addr) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("peer feed full, dropping {addr}");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Background multicast discovery.
pub struct LanDiscovery;

impl LanDiscovery {
    /// Start announcing `advertised_port` and listening for other nodes.
    ///
    /// Must be called from within a Tokio runtime. Both background tasks stop
    /// when `cancel` fires; calling `spawn` again restarts discovery with a
    /// fresh feed. If the multicast port is already taken on this host the
    /// node still announces itself but only learns peers from the static list.
    pub fn spawn(
        config: &TransportConfig,
        advertised_port: u16,
        cancel: CancellationToken,
    ) -> Result<PeerFeed, TransportError> {
        config.validate()?;
        let capacity = config.feed_capacity.max(config.static_peers.len() + 1);
        let feed = PeerFeed::manual(capacity);
        let beacon = Beacon {
            service: config.service_name.clone(),
            instance: feed.instance,
            port: advertised_port,
        };
        let group = SocketAddrV4::new(config.multicast_group, config.multicast_port);

        let announcer = if config.discovery {
            Some(announce_socket()?)
        } else {
            None
        };
        tokio::spawn(announce_loop(
            announcer,
            beacon.clone(),
            group,
            config.static_peers.clone(),
            config.beacon_interval,
            feed.injector(),
            cancel.clone(),
        ));

        if config.discovery {
            match listen_socket(group) {
                Ok(socket) => {
                    tokio::spawn(listen_loop(socket, beacon, feed.injector(), cancel));
                }
                Err(e) => {
                    tracing::warn!("LAN discovery listener unavailable, announcing only: {e}");
                }
            }
        }

        Ok(feed)
    }
}

fn announce_socket() -> Result<UdpSocket, TransportError> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(TransportError::Discovery)?;
    // Link-local only: beacons must never leave the LAN segment.
    socket
        .set_multicast_ttl_v4(1)
        .map_err(TransportError::Discovery)?;
    socket
        .set_multicast_loop_v4(true)
        .map_err(TransportError::Discovery)?;
    socket
        .set_nonblocking(true)
        .map_err(TransportError::Discovery)?;
    UdpSocket::from_std(socket).map_err(TransportError::Discovery)
}

fn listen_socket(group: SocketAddrV4) -> Result<UdpSocket, TransportError> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, group.port()))
        .map_err(TransportError::Discovery)?;
    socket
        .join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)
        .map_err(TransportError::Discovery)?;
    socket
        .set_nonblocking(true)
        .map_err(TransportError::Discovery)?;
    UdpSocket::from_std(socket).map_err(TransportError::Discovery)
}

async fn announce_loop(
    socket: Option<UdpSocket>,
    beacon: Beacon,
    group: SocketAddrV4,
    static_peers: Vec<SocketAddr>,
    every: Duration,
    injector: PeerInjector,
    cancel: CancellationToken,
) {
    let payload = match beacon.to_bytes() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("cannot encode discovery beacon: {e}");
            return;
        }
    };
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Some(socket) = &socket {
            if let Err(e) = socket.send_to(&payload, group).await {
                tracing::debug!("beacon send to {group} failed: {e}");
            }
        }
        for peer in &static_peers {
            injector.offer_peer(*peer);
        }
    }
    tracing::debug!("discovery announcer stopped");
}

async fn listen_loop(
    socket: UdpSocket,
    own: Beacon,
    injector: PeerInjector,
    cancel: CancellationToken,
) {
    tracing::info!("LAN discovery listening for {:?}", own.service);
    let mut buf = [0u8; 512];

    loop {
        let (len, source) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!("discovery recv failed: {e}");
                    continue;
                }
            },
        };

        if let Some(peer) = accept_beacon(&own, &buf[..len], source) {
            tracing::debug!("discovered relay peer {peer}");
            injector.offer_peer(peer);
        }
    }
    tracing::debug!("discovery listener stopped");
}

/// Filter one received datagram down to a peer address worth trying.
fn accept_beacon(own: &Beacon, data: &[u8], source: SocketAddr) -> Option<SocketAddr> {
    let beacon = Beacon::from_bytes(data).ok()?;
    if beacon.service != own.service || beacon.instance == own.instance || beacon.port == 0 {
        return None;
    }
    if source.ip() == IpAddr::V4(Ipv4Addr::UNSPECIFIED) {
        return None;
    }
    Some(beacon.peer_addr(source))
}
