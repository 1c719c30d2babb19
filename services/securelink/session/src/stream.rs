//! Established secure sessions.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use link_transport::RawConnection;
use rustls::pki_types::CertificateDer;
use rustls::ProtocolVersion;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tokio_rustls::TlsStream;
use tracing::trace;

/// Which end of the handshake a session played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Dialled the connection
    Client,
    /// Accepted the connection
    Server,
}

/// Encrypted session over a raw connection, returned after a completed
/// handshake. Reads and writes carry application data.
pub struct SecureSession<C> {
    inner: TlsStream<C>,
}

impl<C: RawConnection> SecureSession<C> {
    pub(crate) fn new(inner: TlsStream<C>) -> Self {
        Self { inner }
    }

    /// Role played in the handshake
    pub fn side(&self) -> Side {
        match self.inner {
            TlsStream::Client(_) => Side::Client,
            TlsStream::Server(_) => Side::Server,
        }
    }

    /// The raw connection underneath the session
    pub fn get_ref(&self) -> &C {
        self.inner.get_ref().0
    }

    /// Mutable access to the raw connection
    pub fn get_mut(&mut self) -> &mut C {
        self.inner.get_mut().0
    }

    /// Set or clear the deadline on the raw connection
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.get_mut().set_deadline(deadline);
    }

    /// Deadline currently applied on the raw connection
    pub fn deadline(&self) -> Option<Instant> {
        self.get_ref().deadline()
    }

    /// Remote address of the raw connection
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().peer_addr()
    }

    /// Certificates presented by the peer, leaf first
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.inner.get_ref().1.peer_certificates()
    }

    /// Negotiated ALPN protocol
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.inner.get_ref().1.alpn_protocol()
    }

    /// Negotiated protocol version
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.inner.get_ref().1.protocol_version()
    }

    /// Hostname indication received from the client (server side only)
    pub fn server_name(&self) -> Option<&str> {
        match &self.inner {
            TlsStream::Server(stream) => stream.get_ref().1.server_name(),
            TlsStream::Client(_) => None,
        }
    }

    /// Unwrap into the engine stream
    pub fn into_inner(self) -> TlsStream<C> {
        self.inner
    }
}

impl<C: RawConnection> fmt::Debug for SecureSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("side", &self.side())
            .field("peer", &self.peer_addr().ok())
            .field("protocol_version", &self.protocol_version())
            .finish()
    }
}

impl<C: RawConnection> AsyncRead for SecureSession<C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<C: RawConnection> AsyncWrite for SecureSession<C> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// A session is itself a raw connection, so secure listeners and sessions
/// can be layered wherever a raw connection is expected.
impl<C: RawConnection> RawConnection for SecureSession<C> {
    fn set_deadline(&mut self, deadline: Option<Instant>) {
        SecureSession::set_deadline(self, deadline);
    }

    fn deadline(&self) -> Option<Instant> {
        SecureSession::deadline(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        SecureSession::peer_addr(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().local_addr()
    }

    fn close(self) {
        trace!(side = ?self.side(), "Closing secure session");
        let conn = match self.inner {
            TlsStream::Client(stream) => stream.into_inner().0,
            TlsStream::Server(stream) => stream.into_inner().0,
        };
        conn.close();
    }
}
