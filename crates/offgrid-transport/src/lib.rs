//! Offgrid relay transport layer.
//!
//! Everything a relay node needs below the handshake: the TCP relay service
//! port, line-delimited JSON framing and LAN peer discovery over multicast
//! beacons.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use offgrid_transport::{connect, LanDiscovery, PeerStream, RelayListener, TransportConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), offgrid_transport::TransportError> {
//! let config = TransportConfig::new();
//! let listener = RelayListener::bind(&config).await?;
//! let port = listener.local_addr()?.port();
//!
//! let mut feed = LanDiscovery::spawn(&config, port, CancellationToken::new())?;
//! if let Some(peer) = feed.next_peer().await {
//!     let io = connect(peer, std::time::Duration::from_secs(10)).await?;
//!     let mut stream = PeerStream::open(io, config.max_frame()).await?;
//!     stream.send(&serde_json::json!({"hello": "peer"})).await?;
//!     stream.finish().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod discovery;
mod error;
mod listener;

pub use codec::PeerStream;
pub use config::{parse_peer_list, TransportConfig};
pub use discovery::{Beacon, LanDiscovery, PeerFeed, PeerInjector};
pub use error::TransportError;
pub use listener::{connect, RelayListener};

/// Service name announced in discovery beacons.
pub const SERVICE_NAME: &str = "offgrid-relay";

/// Default TCP port of the relay service.
pub const DEFAULT_RELAY_PORT: u16 = 9000;

/// First line of every relay stream.
pub const PROTOCOL_ID: &str = "/offgrid-relay/1.0.0";
