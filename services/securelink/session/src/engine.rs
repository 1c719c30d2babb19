//! Adapter over the TLS engine.
//!
//! Session setup is split from the handshake so that a setup failure can
//! be reported while the caller still owns the raw connection. Handshakes
//! hand the connection back on failure for the same reason.

use std::sync::Arc;

use link_transport::RawConnection;
use rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::debug;

use crate::context::SecureContext;
use crate::error::LinkError;
use crate::flags::DialFlags;
use crate::stream::SecureSession;

/// Failed handshake: the error plus the raw connection, still open
pub type HandshakeFailure<C> = (LinkError, C);

/// Server session ready to run its handshake
pub struct ServerSetup {
    acceptor: TlsAcceptor,
}

/// Wrap the server role of `ctx`; fails when the context has no identity
pub fn server_session(ctx: &SecureContext) -> Result<ServerSetup, LinkError> {
    Ok(ServerSetup {
        acceptor: TlsAcceptor::from(ctx.server_config()?),
    })
}

impl ServerSetup {
    /// Run the server handshake over `conn`
    pub async fn handshake<C: RawConnection>(
        self,
        conn: C,
    ) -> Result<SecureSession<C>, HandshakeFailure<C>> {
        match self.acceptor.accept(conn).into_fallible().await {
            Ok(stream) => Ok(SecureSession::new(TlsStream::Server(stream))),
            Err((e, conn)) => Err((LinkError::Handshake(e), conn)),
        }
    }
}

/// Client session ready to run its handshake
pub struct ClientSetup {
    ctx: Arc<SecureContext>,
    flags: DialFlags,
    host: String,
    sni: Option<ServerName<'static>>,
}

/// Wrap the client role of `ctx` for a dial to `host`; fails when the
/// context has no trust anchors
pub fn client_session(
    ctx: &Arc<SecureContext>,
    host: &str,
    flags: DialFlags,
) -> Result<ClientSetup, LinkError> {
    if !ctx.has_trust_anchors() {
        return Err(LinkError::NoTrustAnchors);
    }
    Ok(ClientSetup {
        ctx: ctx.clone(),
        flags,
        host: host.to_string(),
        sni: None,
    })
}

impl ClientSetup {
    /// Send `host` as the hostname indication
    pub fn set_host_name(&mut self, host: &str) -> Result<(), LinkError> {
        let name = ServerName::try_from(host.to_string())
            .map_err(|_| LinkError::ServerName(host.to_string()))?;
        self.sni = Some(name);
        Ok(())
    }

    /// Run the client handshake over `conn`.
    ///
    /// The certificate is verified against the dialled host. The hostname
    /// indication is only sent when `set_host_name` was called.
    pub async fn handshake<C: RawConnection>(
        self,
        conn: C,
    ) -> Result<SecureSession<C>, HandshakeFailure<C>> {
        let name = match self.sni.clone() {
            Some(name) => name,
            None => match ServerName::try_from(self.host.clone()) {
                Ok(name) => name,
                Err(_) => return Err((LinkError::ServerName(self.host), conn)),
            },
        };

        let mut flags = self.flags;
        flags.set(DialFlags::DISABLE_SNI, self.sni.is_none());
        let config = match self.ctx.client_config(flags) {
            Ok(config) => config,
            Err(e) => return Err((e, conn)),
        };

        debug!(server_name = ?name, sni = self.sni.is_some(), "Starting client handshake");
        match TlsConnector::from(config)
            .connect(name, conn)
            .into_fallible()
            .await
        {
            Ok(stream) => Ok(SecureSession::new(TlsStream::Client(stream))),
            Err((e, conn)) => Err((LinkError::Handshake(e), conn)),
        }
    }
}
