use std::net::SocketAddr;
use std::time::Duration;

use offgrid_transport::{PeerFeed, PeerInjector};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::RelayError;

/// Where the orchestrator finds peers and how it reaches them.
///
/// In production: [`LanTransport`] (multicast discovery + TCP).
/// In tests: `MockTransport` (in-process duplex pipes).
#[async_trait::async_trait]
pub trait RelayTransport: Send + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Next discovered peer. May repeat peers; `None` once discovery is over.
    async fn next_peer(&mut self) -> Option<SocketAddr>;

    /// Open a raw connection to `addr`.
    async fn connect(&self, addr: SocketAddr) -> Result<Self::Io, RelayError>;
}

// ── LanTransport (production) ───────────────────────────────────────

/// Discovery feed plus plain TCP dialing.
pub struct LanTransport {
    feed: PeerFeed,
    connect_timeout: Duration,
}

impl LanTransport {
    pub fn new(feed: PeerFeed, connect_timeout: Duration) -> Self {
        Self {
            feed,
            connect_timeout,
        }
    }

    pub fn injector(&self) -> PeerInjector {
        self.feed.injector()
    }
}

#[async_trait::async_trait]
impl RelayTransport for LanTransport {
    type Io = TcpStream;

    async fn next_peer(&mut self) -> Option<SocketAddr> {
        self.feed.next_peer().await
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, RelayError> {
        Ok(offgrid_transport::connect(addr, self.connect_timeout).await?)
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use offgrid_transport::TransportError;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct NetworkState {
        listeners: HashMap<SocketAddr, mpsc::UnboundedSender<DuplexStream>>,
        dialed: Vec<SocketAddr>,
    }

    /// In-process network: addresses map to listeners that receive the
    /// server half of a duplex pipe per connection.
    #[derive(Clone, Default)]
    pub struct MockNetwork {
        state: Arc<Mutex<NetworkState>>,
    }

    impl MockNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        /// Accept connections on `addr`.
        pub fn listen(&self, addr: SocketAddr) -> mpsc::UnboundedReceiver<DuplexStream> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.state.lock().unwrap().listeners.insert(addr, tx);
            rx
        }

        /// Every address dialed so far, in order.
        pub fn dialed(&self) -> Vec<SocketAddr> {
            self.state.lock().unwrap().dialed.clone()
        }

        /// A transport on this network plus the handle that feeds it peers.
        pub fn transport(&self) -> (MockTransport, mpsc::UnboundedSender<SocketAddr>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                MockTransport {
                    network: self.clone(),
                    peers: rx,
                },
                tx,
            )
        }
    }

    pub struct MockTransport {
        network: MockNetwork,
        peers: mpsc::UnboundedReceiver<SocketAddr>,
    }

    #[async_trait::async_trait]
    impl RelayTransport for MockTransport {
        type Io = DuplexStream;

        async fn next_peer(&mut self) -> Option<SocketAddr> {
            self.peers.recv().await
        }

        async fn connect(&self, addr: SocketAddr) -> Result<DuplexStream, RelayError> {
            let mut state = self.network.state.lock().unwrap();
            state.dialed.push(addr);
            let refused = || {
                RelayError::Transport(TransportError::Connect {
                    addr,
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                })
            };
            let listener = state.listeners.get(&addr).ok_or_else(refused)?;
            let (client, server) = tokio::io::duplex(64 * 1024);
            listener.send(server).map_err(|_| refused())?;
            Ok(client)
        }
    }
}
