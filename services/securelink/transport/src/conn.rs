//! Raw connections.
//!
//! A raw connection is an unencrypted byte stream that supports an absolute
//! I/O deadline and explicit closure. Closing consumes the connection, so a
//! connection can never be closed twice.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::trace;

use crate::deadline::DeadlineStream;

/// Unencrypted bidirectional stream owned by one holder at a time
pub trait RawConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Set or clear the absolute deadline for pending and future I/O.
    ///
    /// I/O attempted after the deadline fails with `TimedOut`.
    fn set_deadline(&mut self, deadline: Option<Instant>);

    /// Currently applied deadline
    fn deadline(&self) -> Option<Instant>;

    /// Remote address
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Local address
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Close the connection, releasing the underlying socket
    fn close(self)
    where
        Self: Sized;
}

/// TCP implementation of [`RawConnection`]
#[derive(Debug)]
pub struct TcpConnection {
    stream: DeadlineStream<TcpStream>,
}

impl TcpConnection {
    /// Wrap a connected TCP stream
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: DeadlineStream::new(stream),
        }
    }

    /// Toggle `TCP_NODELAY`
    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.stream.get_ref().set_nodelay(nodelay)
    }

    /// Borrow the TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

impl From<TcpStream> for TcpConnection {
    fn from(stream: TcpStream) -> Self {
        Self::new(stream)
    }
}

impl RawConnection for TcpConnection {
    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.stream.set_deadline(deadline);
    }

    fn deadline(&self) -> Option<Instant> {
        self.stream.deadline()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().local_addr()
    }

    fn close(self) {
        trace!(peer = ?self.peer_addr().ok(), "Closing raw connection");
        drop(self.stream.into_inner());
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
