//! Listener wrapper that upgrades every accepted connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use link_transport::{RawConnection, RawListener, TcpRawListener};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::SecureContext;
use crate::engine::server_session;
use crate::error::LinkError;
use crate::stream::SecureSession;

/// Decorates a raw listener so that `accept` only ever yields completed
/// server sessions.
///
/// The context is not validated until the first accept: a listener built
/// without one fails every accept, closing the connection it received.
#[derive(Debug)]
pub struct SecureListener<L> {
    inner: L,
    ctx: Option<Arc<SecureContext>>,
    handshake_timeout: Option<Duration>,
}

impl<L: RawListener> SecureListener<L> {
    /// Wrap an open listener
    pub fn new(inner: L, ctx: Option<Arc<SecureContext>>) -> Self {
        Self {
            inner,
            ctx,
            handshake_timeout: None,
        }
    }

    /// Bound each server handshake by `timeout`
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Accept the next connection and run the server handshake on it.
    ///
    /// Errors from the inner listener are returned unchanged. Any failure
    /// after a connection was accepted closes that connection first.
    pub async fn accept(&self) -> Result<SecureSession<L::Conn>, LinkError> {
        let mut conn = self.inner.accept().await?;
        let peer = conn.peer_addr().ok();

        let setup = match self.ctx.as_deref() {
            Some(ctx) => server_session(ctx),
            None => Err(LinkError::NoContext),
        };
        let setup = match setup {
            Ok(setup) => setup,
            Err(e) => {
                warn!(peer = ?peer, error = %e, "Server session setup failed");
                conn.close();
                return Err(e);
            }
        };

        if let Some(timeout) = self.handshake_timeout {
            conn.set_deadline(Some(Instant::now() + timeout));
        }

        debug!(peer = ?peer, "Starting server handshake");
        match setup.handshake(conn).await {
            Ok(mut session) => {
                if self.handshake_timeout.is_some() {
                    session.set_deadline(None);
                }
                info!(
                    peer = ?peer,
                    version = ?session.protocol_version(),
                    sni = ?session.server_name(),
                    "Secure session accepted"
                );
                Ok(session)
            }
            Err((e, conn)) => {
                warn!(peer = ?peer, error = %e, "Server handshake failed");
                conn.close();
                Err(e)
            }
        }
    }

    /// Address of the inner listener
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// A secure listener is itself a raw listener, so it can be decorated
/// again or handed to code written against [`RawListener`].
#[async_trait]
impl<L: RawListener> RawListener for SecureListener<L> {
    type Conn = SecureSession<L::Conn>;

    async fn accept(&self) -> io::Result<Self::Conn> {
        SecureListener::accept(self).await.map_err(io::Error::from)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        SecureListener::local_addr(self)
    }
}

/// Bind a TCP listener on `addr` and wrap it.
///
/// `network` is one of `tcp`, `tcp4` or `tcp6`. Without a context nothing
/// is bound and [`LinkError::NoContext`] is returned.
pub async fn listen(
    network: &str,
    addr: &str,
    ctx: Option<Arc<SecureContext>>,
) -> Result<SecureListener<TcpRawListener>, LinkError> {
    let Some(ctx) = ctx else {
        return Err(LinkError::NoContext);
    };
    let network = network.parse()?;
    let inner = link_transport::listen(network, addr).await?;
    Ok(SecureListener::new(inner, Some(ctx)))
}
