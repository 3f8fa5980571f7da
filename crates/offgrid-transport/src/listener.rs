use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::{TransportConfig, TransportError};

/// The relay service port: accepts inbound relay connections.
#[derive(Debug)]
pub struct RelayListener {
    inner: TcpListener,
}

impl RelayListener {
    pub async fn bind(config: &TransportConfig) -> Result<Self, TransportError> {
        let addr = config.relay_addr();
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        tracing::info!("relay service listening on {}", inner.local_addr()?);
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.inner.local_addr()?)
    }

    /// Wait for the next inbound connection.
    ///
    /// Protocol negotiation is left to the caller so a slow peer cannot stall
    /// the accept loop.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        let (stream, remote) = self.inner.accept().await?;
        let _ = stream.set_nodelay(true);
        Ok((stream, remote))
    }
}

/// Dial a peer's relay service port, giving up after `timeout`.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(source)) => Err(TransportError::Connect { addr, source }),
        Err(_) => Err(TransportError::ConnectTimeout { addr, timeout }),
    }
}
