//! Raw listeners.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpListener};
use tracing::{debug, info};

use crate::addr::split_host_port;
use crate::conn::{RawConnection, TcpConnection};
use crate::network::Network;

/// Source of inbound raw connections
#[async_trait]
pub trait RawListener: Send + Sync {
    /// Connection type produced by `accept`
    type Conn: RawConnection;

    /// Wait for the next inbound connection
    async fn accept(&self) -> io::Result<Self::Conn>;

    /// Address the listener is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// TCP implementation of [`RawListener`]
#[derive(Debug)]
pub struct TcpRawListener {
    inner: TcpListener,
}

impl TcpRawListener {
    /// Wrap an already bound tokio listener
    pub fn new(inner: TcpListener) -> Self {
        Self { inner }
    }

    /// Borrow the tokio listener
    pub fn get_ref(&self) -> &TcpListener {
        &self.inner
    }
}

impl From<TcpListener> for TcpRawListener {
    fn from(inner: TcpListener) -> Self {
        Self::new(inner)
    }
}

#[async_trait]
impl RawListener for TcpRawListener {
    type Conn = TcpConnection;

    async fn accept(&self) -> io::Result<TcpConnection> {
        let (stream, peer) = self.inner.accept().await?;
        debug!(peer = %peer, "Raw connection accepted");
        Ok(TcpConnection::new(stream))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Bind a TCP listener on `addr` (`host:port`, empty host for all interfaces)
pub async fn listen(network: Network, addr: &str) -> io::Result<TcpRawListener> {
    let (host, port) =
        split_host_port(addr).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let port: u16 = port.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("address {}: invalid port", addr),
        )
    })?;

    let candidates: Vec<SocketAddr> = if host.is_empty() {
        vec![SocketAddr::new(network.unspecified(), port)]
    } else {
        lookup_host((host, port))
            .await?
            .filter(|candidate| network.admits(candidate))
            .collect()
    };

    let mut last_err = None;
    for candidate in candidates {
        match TcpListener::bind(candidate).await {
            Ok(listener) => {
                let local_addr = listener.local_addr()?;
                info!(network = %network, address = %local_addr, "Listener bound");
                return Ok(TcpRawListener::new(listener));
            }
            Err(e) => {
                debug!(address = %candidate, error = %e, "Bind failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {} address found for {}", network, addr),
        )
    }))
}
