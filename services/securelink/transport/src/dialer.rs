//! Outbound raw connections and the dial timeout budget.
//!
//! A [`DialPolicy`] carries a relative timeout, an absolute deadline, both
//! or neither. The same budget bounds the raw connect and, once applied as
//! a deadline on the connection, everything that follows it (the secure
//! handshake in particular).

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::addr::HostPort;
use crate::conn::{RawConnection, TcpConnection};
use crate::deadline::deadline_exceeded;
use crate::network::Network;

/// Timing and socket options for one dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialPolicy {
    /// Relative bound on the whole establishment; zero means unset
    pub timeout: Option<Duration>,
    /// Absolute bound on the whole establishment
    pub deadline: Option<Instant>,
    /// Local address to bind before connecting
    pub local_addr: Option<SocketAddr>,
    /// Set `TCP_NODELAY` on the new connection
    pub nodelay: bool,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            deadline: None,
            local_addr: None,
            nodelay: true,
        }
    }
}

impl DialPolicy {
    /// Set the relative timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Bind to `local_addr` before connecting
    pub fn with_local_addr(mut self, local_addr: SocketAddr) -> Self {
        self.local_addr = Some(local_addr);
        self
    }

    /// Toggle `TCP_NODELAY`
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Timeout left for the establishment as seen from `now`.
    ///
    /// The tighter of the relative timeout and the time remaining until the
    /// deadline wins. `None` means no bound: neither value is set, or the
    /// deadline has already passed.
    pub fn effective_timeout(&self, now: Instant) -> Option<Duration> {
        let mut timeout = self.timeout.filter(|t| !t.is_zero());
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(now);
            timeout = match timeout {
                Some(t) if t <= remaining => Some(t),
                _ => Some(remaining),
            };
        }
        timeout.filter(|t| !t.is_zero())
    }

    /// Absolute deadline to apply on a connection at `now`, if any
    pub fn budget_deadline(&self, now: Instant) -> Option<Instant> {
        self.effective_timeout(now).map(|timeout| now + timeout)
    }

    /// Bound for the connect phase; an already-passed deadline is kept so
    /// the connect fails instead of running unbounded.
    fn connect_deadline(&self, now: Instant) -> Option<Instant> {
        let by_timeout = self.timeout.filter(|t| !t.is_zero()).map(|t| now + t);
        match (by_timeout, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Source of outbound raw connections
#[async_trait]
pub trait RawDialer: Send + Sync {
    /// Connection type produced by `dial`
    type Conn: RawConnection;

    /// Open a raw connection to `target`, honouring the policy's budget
    async fn dial(
        &self,
        network: Network,
        target: &HostPort,
        policy: &DialPolicy,
    ) -> io::Result<Self::Conn>;
}

/// TCP implementation of [`RawDialer`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl RawDialer for TcpDialer {
    type Conn = TcpConnection;

    async fn dial(
        &self,
        network: Network,
        target: &HostPort,
        policy: &DialPolicy,
    ) -> io::Result<TcpConnection> {
        let stream = match policy.connect_deadline(Instant::now()) {
            Some(deadline) if deadline <= Instant::now() => return Err(deadline_exceeded()),
            Some(deadline) => timeout_at(deadline, connect_any(network, target, policy))
                .await
                .map_err(|_| deadline_exceeded())??,
            None => connect_any(network, target, policy).await?,
        };

        stream.set_nodelay(policy.nodelay)?;
        debug!(
            addr = %target,
            peer = ?stream.peer_addr().ok(),
            "Raw connection established"
        );
        Ok(TcpConnection::new(stream))
    }
}

async fn connect_any(
    network: Network,
    target: &HostPort,
    policy: &DialPolicy,
) -> io::Result<TcpStream> {
    let candidates: Vec<SocketAddr> = lookup_host((target.host(), target.port()))
        .await?
        .filter(|candidate| network.admits(candidate))
        .collect();

    let mut last_err = None;
    for candidate in candidates {
        match connect_one(candidate, policy).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(address = %candidate, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {} address found for {}", network, target),
        )
    }))
}

async fn connect_one(addr: SocketAddr, policy: &DialPolicy) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(local_addr) = policy.local_addr {
        socket.bind(local_addr)?;
    }
    socket.connect(addr).await
}
