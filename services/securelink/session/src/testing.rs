//! Test support: throwaway PKI and in-memory raw connections.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use link_transport::{
    DeadlineStream, DialPolicy, HostPort, Network, RawConnection, RawDialer, RawListener,
};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::time::Instant;

use crate::context::SecureContext;

/// CA plus one leaf certificate for the given names
pub(crate) struct TestPki {
    pub ca_der: CertificateDer<'static>,
    pub ca_pem: String,
    pub leaf_der: CertificateDer<'static>,
    pub leaf_pem: String,
    pub key_der: Vec<u8>,
    pub key_pem: String,
}

impl TestPki {
    pub fn new(names: &[&str]) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "securelink test ca");
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let sans: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut leaf_params = CertificateParams::new(sans).unwrap();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, names[0]);
        let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

        Self {
            ca_der: ca.der().clone(),
            ca_pem: ca.pem(),
            leaf_der: leaf.der().clone(),
            leaf_pem: leaf.pem(),
            key_der: leaf_key.serialize_der(),
            key_pem: leaf_key.serialize_pem(),
        }
    }

    pub fn key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }

    /// Context that serves the leaf certificate
    pub fn server_context(&self) -> Arc<SecureContext> {
        Arc::new(
            SecureContext::builder()
                .with_identity(vec![self.leaf_der.clone()], self.key())
                .build()
                .unwrap(),
        )
    }

    /// Context that trusts the CA
    pub fn client_context(&self) -> Arc<SecureContext> {
        Arc::new(
            SecureContext::builder()
                .with_root_der(self.ca_der.clone())
                .unwrap()
                .build()
                .unwrap(),
        )
    }
}

/// Observations shared between a [`MockConn`] and the test
#[derive(Debug, Default)]
pub(crate) struct ConnProbe {
    pub closes: AtomicUsize,
    pub deadline: Mutex<Option<Instant>>,
}

impl ConnProbe {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn last_deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap()
    }
}

/// In-memory raw connection that records closes and deadlines
#[derive(Debug)]
pub(crate) struct MockConn {
    pub id: u32,
    stream: DeadlineStream<DuplexStream>,
    probe: Arc<ConnProbe>,
}

/// Two connected mock connections and their probes
pub(crate) fn mock_pair() -> ((MockConn, Arc<ConnProbe>), (MockConn, Arc<ConnProbe>)) {
    let (a, b) = duplex(64 * 1024);
    (MockConn::new(1, a), MockConn::new(2, b))
}

/// One mock connection plus the bare peer end
pub(crate) fn mock_conn() -> (MockConn, Arc<ConnProbe>, DuplexStream) {
    let (a, b) = duplex(64 * 1024);
    let (conn, probe) = MockConn::new(1, a);
    (conn, probe, b)
}

impl MockConn {
    fn new(id: u32, stream: DuplexStream) -> (Self, Arc<ConnProbe>) {
        let probe = Arc::new(ConnProbe::default());
        (
            Self {
                id,
                stream: DeadlineStream::new(stream),
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl RawConnection for MockConn {
    fn set_deadline(&mut self, deadline: Option<Instant>) {
        *self.probe.deadline.lock().unwrap() = deadline;
        self.stream.set_deadline(deadline);
    }

    fn deadline(&self) -> Option<Instant> {
        self.stream.deadline()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 40000 + self.id as u16)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 443)))
    }

    fn close(self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncRead for MockConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockConn {
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

/// Dialer handing out a queued mock connection
#[derive(Debug, Default)]
pub(crate) struct MockDialer {
    queued: Mutex<Option<MockConn>>,
    pub dials: AtomicUsize,
}

impl MockDialer {
    pub fn with(conn: MockConn) -> Self {
        Self {
            queued: Mutex::new(Some(conn)),
            dials: AtomicUsize::new(0),
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RawDialer for MockDialer {
    type Conn = MockConn;

    async fn dial(
        &self,
        _network: Network,
        _target: &HostPort,
        _policy: &DialPolicy,
    ) -> io::Result<MockConn> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.queued.lock().unwrap().take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "no connection queued")
        })
    }
}

/// Listener handing out queued mock connections
#[derive(Debug, Default)]
pub(crate) struct MockListener {
    queued: Mutex<VecDeque<MockConn>>,
}

impl MockListener {
    pub fn with(conns: impl IntoIterator<Item = MockConn>) -> Self {
        Self {
            queued: Mutex::new(conns.into_iter().collect()),
        }
    }
}

#[async_trait]
impl RawListener for MockListener {
    type Conn = MockConn;

    async fn accept(&self) -> io::Result<MockConn> {
        self.queued.lock().unwrap().pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "listener exhausted")
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 443)))
    }
}
