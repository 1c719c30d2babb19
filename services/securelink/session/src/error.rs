//! Session establishment errors.

use std::io;

use link_transport::{AddrError, UnknownNetwork};
use thiserror::Error;

/// Errors raised while building contexts or establishing secure sessions.
///
/// Configuration errors are raised before any network I/O. Transport errors
/// pass through unchanged. Setup and handshake errors are only returned
/// after the raw connection has been closed.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Listener or listen call without a context
    #[error("no secure context provided")]
    NoContext,

    /// Malformed destination address
    #[error(transparent)]
    Address(#[from] AddrError),

    /// Unknown network name
    #[error(transparent)]
    Network(#[from] UnknownNetwork),

    /// Unreadable PEM input
    #[error("invalid PEM in {what}: {source}")]
    Pem {
        /// Which input was being parsed
        what: &'static str,
        /// Underlying parse error
        #[source]
        source: io::Error,
    },

    /// Context material present but unusable
    #[error("invalid secure context: {0}")]
    Context(String),

    /// Configuration rejected by the TLS engine
    #[error("tls configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    /// Server session requested from a context without an identity
    #[error("secure context has no identity for the server role")]
    NoServerIdentity,

    /// Client session requested from a context without trust anchors
    #[error("secure context has no trust anchors for the client role")]
    NoTrustAnchors,

    /// Host cannot be used as a TLS server name
    #[error("invalid server name {0:?}")]
    ServerName(String),

    /// Certificate could not be decoded
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// Raw transport failure (connect, accept, deadline)
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Handshake failure, including deadline expiry mid-handshake
    #[error("handshake failed: {0}")]
    Handshake(#[source] io::Error),
}

impl LinkError {
    /// Whether the error comes from an elapsed timeout or deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            LinkError::Io(e) | LinkError::Handshake(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Whether the error was raised before any network I/O
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            LinkError::NoContext
                | LinkError::Address(_)
                | LinkError::Network(_)
                | LinkError::Pem { .. }
                | LinkError::Context(_)
                | LinkError::Tls(_)
        )
    }
}

impl From<LinkError> for io::Error {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Io(e) => e,
            LinkError::Handshake(e) if e.kind() == io::ErrorKind::TimedOut => e,
            LinkError::Handshake(e) => io::Error::new(io::ErrorKind::ConnectionAborted, e),
            other if other.is_config() => io::Error::new(io::ErrorKind::InvalidInput, other),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "late");
        assert!(LinkError::Io(timed_out).is_timeout());

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "late");
        assert!(LinkError::Handshake(timed_out).is_timeout());

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(!LinkError::Io(refused).is_timeout());
        assert!(!LinkError::NoContext.is_timeout());
    }

    #[test]
    fn test_io_conversion() {
        assert_eq!(io::Error::from(LinkError::NoContext).kind(), io::ErrorKind::InvalidInput);
        assert_eq!(
            io::Error::from(LinkError::NoServerIdentity).kind(),
            io::ErrorKind::Other
        );
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(io::Error::from(LinkError::Io(reset)).kind(), io::ErrorKind::ConnectionReset);
        let bad = io::Error::new(io::ErrorKind::InvalidData, "bad record");
        assert_eq!(
            io::Error::from(LinkError::Handshake(bad)).kind(),
            io::ErrorKind::ConnectionAborted
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(LinkError::NoContext.to_string(), "no secure context provided");
        assert_eq!(
            LinkError::ServerName("bad host".into()).to_string(),
            "invalid server name \"bad host\""
        );
    }
}
