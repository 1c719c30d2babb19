//! Dialing secure sessions.
//!
//! The raw connect runs under the policy's timeout and deadline. Once it
//! succeeds the budget is computed afresh: the relative timeout restarts
//! from that moment, capped by whatever remains until the absolute
//! deadline, and the result is applied as a deadline on the raw connection
//! before the handshake starts. The deadline is left in place on the
//! returned session; clear it with [`SecureSession::set_deadline`].

use std::sync::Arc;

use link_transport::{DialPolicy, HostPort, Network, RawConnection, RawDialer, TcpConnection, TcpDialer};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::SecureContext;
use crate::engine::client_session;
use crate::error::LinkError;
use crate::flags::DialFlags;
use crate::stream::SecureSession;

/// Dials secure sessions over a raw dialer under a fixed [`DialPolicy`]
#[derive(Debug, Clone, Default)]
pub struct Dialer<D = TcpDialer> {
    raw: D,
    policy: DialPolicy,
}

impl Dialer<TcpDialer> {
    /// TCP dialer with the given policy
    pub fn new(policy: DialPolicy) -> Self {
        Self::with_raw(TcpDialer, policy)
    }
}

impl<D: RawDialer> Dialer<D> {
    /// Dialer over any raw transport
    pub fn with_raw(raw: D, policy: DialPolicy) -> Self {
        Self { raw, policy }
    }

    /// Policy applied to every dial
    pub fn policy(&self) -> &DialPolicy {
        &self.policy
    }

    /// The raw dialer
    pub fn raw(&self) -> &D {
        &self.raw
    }

    /// Connect to `addr` (`host:port`) and complete the client handshake.
    ///
    /// Without a context the default client context is used. The address,
    /// network and default context are resolved before any connection is
    /// made; every later failure closes the raw connection before returning.
    pub async fn dial(
        &self,
        network: &str,
        addr: &str,
        ctx: Option<Arc<SecureContext>>,
        flags: DialFlags,
    ) -> Result<SecureSession<D::Conn>, LinkError> {
        let network: Network = network.parse()?;
        let target = HostPort::parse(addr)?;
        let ctx = match ctx {
            Some(ctx) => ctx,
            None => Arc::new(SecureContext::new_default()?),
        };

        let mut conn = self.raw.dial(network, &target, &self.policy).await?;
        debug!(addr = %target, flags = ?flags, "Raw connection ready");

        let now = Instant::now();
        if let Some(deadline) = self.policy.budget_deadline(now) {
            debug!(addr = %target, timeout = ?(deadline - now), "Applying handshake deadline");
            conn.set_deadline(Some(deadline));
        }

        let mut setup = match client_session(&ctx, target.host(), flags) {
            Ok(setup) => setup,
            Err(e) => return Err(fail(conn, &target, e)),
        };

        if !flags.contains(DialFlags::DISABLE_SNI) {
            if let Err(e) = setup.set_host_name(target.host()) {
                return Err(fail(conn, &target, e));
            }
        }

        match setup.handshake(conn).await {
            Ok(session) => {
                info!(
                    addr = %target,
                    version = ?session.protocol_version(),
                    alpn = ?session.alpn_protocol().map(String::from_utf8_lossy),
                    "Secure session established"
                );
                Ok(session)
            }
            Err((e, conn)) => Err(fail(conn, &target, e)),
        }
    }
}

fn fail<C: RawConnection>(conn: C, target: &HostPort, err: LinkError) -> LinkError {
    warn!(addr = %target, error = %err, "Secure dial failed");
    conn.close();
    err
}

/// Dial `addr` over TCP with no timeout.
///
/// `network` is one of `tcp`, `tcp4` or `tcp6`.
pub async fn dial(
    network: &str,
    addr: &str,
    ctx: Option<Arc<SecureContext>>,
    flags: DialFlags,
) -> Result<SecureSession<TcpConnection>, LinkError> {
    dial_with_policy(network, addr, ctx, flags, &DialPolicy::default()).await
}

/// Dial `addr` over TCP, bounding the connect and the handshake together
/// by the policy's timeout and deadline.
pub async fn dial_with_policy(
    network: &str,
    addr: &str,
    ctx: Option<Arc<SecureContext>>,
    flags: DialFlags,
    policy: &DialPolicy,
) -> Result<SecureSession<TcpConnection>, LinkError> {
    Dialer::new(policy.clone())
        .dial(network, addr, ctx, flags)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{listen, SecureListener};
    use crate::testing::{mock_conn, mock_pair, MockDialer, MockListener, TestPki};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn mock_dialer(conn: crate::testing::MockConn) -> Dialer<MockDialer> {
        Dialer::with_raw(MockDialer::with(conn), DialPolicy::default())
    }

    #[tokio::test]
    async fn test_malformed_address_never_dials() {
        let pki = TestPki::new(&["localhost"]);
        for addr in ["localhost", "[::1", "a:b:c", "localhost:http", "localhost:70000", ":443"] {
            let (conn, probe, _peer) = mock_conn();
            let dialer = mock_dialer(conn);
            let err = dialer
                .dial("tcp", addr, Some(pki.client_context()), DialFlags::empty())
                .await
                .unwrap_err();
            assert!(matches!(err, LinkError::Address(_)), "{}: {:?}", addr, err);
            assert!(err.is_config());
            assert_eq!(dialer.raw().dials(), 0);
            assert_eq!(probe.closes(), 0);
        }
    }

    #[tokio::test]
    async fn test_unknown_network_never_dials() {
        let (conn, _probe, _peer) = mock_conn();
        let dialer = mock_dialer(conn);
        let err = dialer
            .dial("udp", "localhost:443", None, DialFlags::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Network(_)));
        assert_eq!(dialer.raw().dials(), 0);
    }

    #[tokio::test]
    async fn test_raw_dial_error_is_unchanged() {
        let pki = TestPki::new(&["localhost"]);
        let dialer = Dialer::with_raw(MockDialer::default(), DialPolicy::default());
        let err = dialer
            .dial("tcp", "localhost:443", Some(pki.client_context()), DialFlags::empty())
            .await
            .unwrap_err();
        match err {
            LinkError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(dialer.raw().dials(), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_closes_connection() {
        let pki = TestPki::new(&["localhost"]);
        let (conn, probe, _peer) = mock_conn();
        let dialer = mock_dialer(conn);

        // Identity only: the context cannot dial
        let err = dialer
            .dial("tcp", "localhost:443", Some(pki.server_context()), DialFlags::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NoTrustAnchors));
        assert_eq!(probe.closes(), 1);
    }

    #[tokio::test]
    async fn test_invalid_server_name_closes_connection() {
        let pki = TestPki::new(&["localhost"]);
        for flags in [DialFlags::empty(), DialFlags::DISABLE_SNI] {
            let (conn, probe, _peer) = mock_conn();
            let dialer = mock_dialer(conn);
            let err = dialer
                .dial("tcp", "bad host:443", Some(pki.client_context()), flags)
                .await
                .unwrap_err();
            assert!(matches!(err, LinkError::ServerName(_)), "{:?}", err);
            assert_eq!(dialer.raw().dials(), 1);
            assert_eq!(probe.closes(), 1);
        }
    }

    #[tokio::test]
    async fn test_handshake_failure_closes_connection() {
        let pki = TestPki::new(&["localhost"]);
        let (conn, probe, mut peer) = mock_conn();
        peer.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();

        let err = mock_dialer(conn)
            .dial("tcp", "localhost:22", Some(pki.client_context()), DialFlags::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Handshake(_)), "{:?}", err);
        assert!(!err.is_timeout());
        assert_eq!(probe.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_handshake() {
        let pki = TestPki::new(&["localhost"]);
        let (conn, probe, _silent_peer) = mock_conn();
        let start = Instant::now();
        let policy = DialPolicy::default()
            .with_timeout(Duration::from_secs(10))
            .with_deadline(start + Duration::from_secs(4));
        let dialer = Dialer::with_raw(MockDialer::with(conn), policy);

        let err = dialer
            .dial("tcp", "localhost:443", Some(pki.client_context()), DialFlags::empty())
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
        assert_eq!(probe.last_deadline(), Some(start + Duration::from_secs(4)));
        assert_eq!(probe.closes(), 1);
    }

    #[tokio::test]
    async fn test_no_budget_sets_no_deadline() {
        let pki = TestPki::new(&["localhost"]);
        let (conn, probe, _peer) = mock_conn();
        let _ = mock_dialer(conn)
            .dial("tcp", "localhost:443", Some(pki.server_context()), DialFlags::empty())
            .await;
        assert_eq!(probe.last_deadline(), None);
    }

    /// Handshake a mock pair through a secure listener and a dialer
    async fn handshake_pair(
        pki: &TestPki,
        addr: &str,
        flags: DialFlags,
    ) -> (
        Result<SecureSession<crate::testing::MockConn>, LinkError>,
        Result<SecureSession<crate::testing::MockConn>, LinkError>,
    ) {
        let ((server_conn, _), (client_conn, _)) = mock_pair();
        let listener =
            SecureListener::new(MockListener::with([server_conn]), Some(pki.server_context()));
        let dialer = mock_dialer(client_conn);
        tokio::join!(
            listener.accept(),
            dialer.dial("tcp", addr, Some(pki.client_context()), flags)
        )
    }

    #[tokio::test]
    async fn test_sni_sent_by_default() {
        let pki = TestPki::new(&["localhost"]);
        let (server, client) = handshake_pair(&pki, "localhost:443", DialFlags::empty()).await;
        let client = client.unwrap();
        assert_eq!(client.side(), crate::stream::Side::Client);
        assert_eq!(server.unwrap().server_name(), Some("localhost"));
    }

    #[tokio::test]
    async fn test_disable_sni_omits_server_name() {
        let pki = TestPki::new(&["localhost"]);
        let (server, client) = handshake_pair(&pki, "localhost:443", DialFlags::DISABLE_SNI).await;
        assert!(client.is_ok());
        assert_eq!(server.unwrap().server_name(), None);
    }

    #[tokio::test]
    async fn test_hostname_mismatch_is_rejected() {
        let pki = TestPki::new(&["localhost"]);
        let (_, client) = handshake_pair(&pki, "127.0.0.1:443", DialFlags::empty()).await;
        let err = client.unwrap_err();
        assert!(matches!(err, LinkError::Handshake(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_skip_host_verification_accepts_mismatch() {
        let pki = TestPki::new(&["localhost"]);
        let (server, client) = handshake_pair(
            &pki,
            "127.0.0.1:443",
            DialFlags::INSECURE_SKIP_HOST_VERIFICATION,
        )
        .await;
        let client = client.unwrap();
        assert!(client.peer_certificates().is_some());
        // IP addresses never travel as SNI
        assert_eq!(server.unwrap().server_name(), None);
    }

    #[tokio::test]
    async fn test_skip_host_verification_still_checks_chain() {
        let pki = TestPki::new(&["localhost"]);
        let other = TestPki::new(&["localhost"]);
        let ((server_conn, _), (client_conn, client_probe)) = mock_pair();
        let listener =
            SecureListener::new(MockListener::with([server_conn]), Some(pki.server_context()));
        let dialer = mock_dialer(client_conn);

        let (_, client) = tokio::join!(
            listener.accept(),
            dialer.dial(
                "tcp",
                "localhost:443",
                Some(other.client_context()),
                DialFlags::INSECURE_SKIP_HOST_VERIFICATION
            )
        );
        assert!(matches!(client.unwrap_err(), LinkError::Handshake(_)));
        assert_eq!(client_probe.closes(), 1);
    }

    #[tokio::test]
    async fn test_default_context_when_none_given() {
        let pki = TestPki::new(&["localhost"]);
        let ((server_conn, _), (client_conn, _)) = mock_pair();
        let listener =
            SecureListener::new(MockListener::with([server_conn]), Some(pki.server_context()));
        let dialer = mock_dialer(client_conn);

        // The bundled roots do not include the throwaway CA
        let (_, client) = tokio::join!(
            listener.accept(),
            dialer.dial("tcp", "localhost:443", None, DialFlags::empty())
        );
        assert!(matches!(client.unwrap_err(), LinkError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_dial_with_policy_over_tcp() {
        let pki = TestPki::new(&["localhost"]);
        let listener = listen("tcp", "127.0.0.1:0", Some(pki.server_context()))
            .await
            .unwrap();
        let addr = format!("localhost:{}", listener.local_addr().unwrap().port());

        let server = tokio::spawn(async move {
            let mut session = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            session.read_exact(&mut buf).await.unwrap();
            session.write_all(&buf).await.unwrap();
            session.flush().await.unwrap();
        });

        let policy = DialPolicy::default().with_timeout(Duration::from_secs(10));
        let mut client = dial_with_policy(
            "tcp",
            &addr,
            Some(pki.client_context()),
            DialFlags::empty(),
            &policy,
        )
        .await
        .unwrap();
        assert!(client.deadline().is_some());
        client.set_deadline(None);

        client.write_all(b"echo").await.unwrap();
        client.flush().await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echo");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_before_handshake() {
        let pki = TestPki::new(&["localhost"]);
        let listener = listen("tcp", "127.0.0.1:0", Some(pki.server_context()))
            .await
            .unwrap();
        let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());

        let policy = DialPolicy::default().with_deadline(Instant::now() - Duration::from_millis(1));
        let err = dial_with_policy("tcp", &addr, Some(pki.client_context()), DialFlags::empty(), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
        assert!(err.is_timeout());
    }
}
