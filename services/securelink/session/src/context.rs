//! Secure contexts: certificate material and protocol policy.
//!
//! A [`SecureContext`] is built once and shared read-only (behind an `Arc`)
//! by every listener and dial that uses it. It may hold a server identity,
//! client trust anchors, or both; a missing role is only reported when a
//! session for that role is set up.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use rustls::client::{VerifierBuilderError, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::{debug, info};

use crate::error::LinkError;
use crate::flags::DialFlags;
use crate::verifier::SkipHostnameVerifier;

static PROVIDER: Lazy<Arc<CryptoProvider>> =
    Lazy::new(|| Arc::new(rustls::crypto::ring::default_provider()));

fn provider() -> Arc<CryptoProvider> {
    PROVIDER.clone()
}

/// Client configuration shared by every flag combination
struct ClientBase {
    config: ClientConfig,
    verifier: Arc<WebPkiServerVerifier>,
}

/// Certificate material and protocol policy for secure sessions
pub struct SecureContext {
    server: Option<Arc<ServerConfig>>,
    client: Option<ClientBase>,
    // One lazily built client config per DialFlags combination
    client_variants: [OnceCell<Arc<ClientConfig>>; 4],
    alpn_protocols: Vec<Vec<u8>>,
}

impl SecureContext {
    /// Start building a context
    pub fn builder() -> SecureContextBuilder {
        SecureContextBuilder::new()
    }

    /// Default client context trusting the bundled Mozilla root set
    pub fn new_default() -> Result<Self, LinkError> {
        Self::builder().with_webpki_roots().build()
    }

    /// Whether the context can serve (has a local identity)
    pub fn has_server_identity(&self) -> bool {
        self.server.is_some()
    }

    /// Whether the context can dial (has trust anchors)
    pub fn has_trust_anchors(&self) -> bool {
        self.client.is_some()
    }

    /// Configured ALPN protocols, in preference order
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }

    /// Engine configuration for the server role
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, LinkError> {
        self.server.clone().ok_or(LinkError::NoServerIdentity)
    }

    /// Engine configuration for the client role under `flags`
    pub fn client_config(&self, flags: DialFlags) -> Result<Arc<ClientConfig>, LinkError> {
        let base = self.client.as_ref().ok_or(LinkError::NoTrustAnchors)?;
        let slot = &self.client_variants[(flags.bits() & 0b11) as usize];
        let config = slot.get_or_init(|| {
            let mut config = base.config.clone();
            config.enable_sni = !flags.contains(DialFlags::DISABLE_SNI);
            if flags.contains(DialFlags::INSECURE_SKIP_HOST_VERIFICATION) {
                config
                    .dangerous()
                    .set_certificate_verifier(Arc::new(SkipHostnameVerifier::new(
                        base.verifier.clone(),
                    )));
            }
            debug!(flags = ?flags, "Built client configuration");
            Arc::new(config)
        });
        Ok(config.clone())
    }
}

impl fmt::Debug for SecureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureContext")
            .field("server_identity", &self.has_server_identity())
            .field("trust_anchors", &self.has_trust_anchors())
            .field("alpn_protocols", &self.alpn_protocols.len())
            .finish()
    }
}

/// Builder for [`SecureContext`]
pub struct SecureContextBuilder {
    roots: RootCertStore,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    client_ca: Option<RootCertStore>,
    alpn_protocols: Vec<Vec<u8>>,
}

impl Default for SecureContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureContextBuilder {
    /// Empty builder: no trust anchors, no identity
    pub fn new() -> Self {
        Self {
            roots: RootCertStore::empty(),
            identity: None,
            client_ca: None,
            alpn_protocols: Vec::new(),
        }
    }

    /// Trust the bundled Mozilla root set
    pub fn with_webpki_roots(mut self) -> Self {
        self.roots
            .extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        self
    }

    /// Trust a single DER certificate
    pub fn with_root_der(mut self, cert: CertificateDer<'static>) -> Result<Self, LinkError> {
        self.roots.add(cert)?;
        Ok(self)
    }

    /// Trust every certificate in a PEM bundle
    pub fn with_root_pem(mut self, pem: &[u8]) -> Result<Self, LinkError> {
        for cert in parse_certs(pem, "trust anchors")? {
            self.roots.add(cert)?;
        }
        Ok(self)
    }

    /// Trust every certificate in a PEM file
    pub fn with_root_file(self, path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let pem = std::fs::read(path.as_ref())?;
        self.with_root_pem(&pem)
    }

    /// Local identity from a DER chain (leaf first) and private key
    pub fn with_identity(
        mut self,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Self {
        self.identity = Some((chain, key));
        self
    }

    /// Local identity from a PEM chain and a PEM private key
    pub fn with_identity_pem(self, chain_pem: &[u8], key_pem: &[u8]) -> Result<Self, LinkError> {
        let chain = parse_certs(chain_pem, "certificate chain")?;
        let key = parse_key(key_pem)?;
        Ok(self.with_identity(chain, key))
    }

    /// Local identity from PEM files
    pub fn with_identity_files(
        self,
        chain_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, LinkError> {
        let chain_pem = std::fs::read(chain_path.as_ref())?;
        let key_pem = std::fs::read(key_path.as_ref())?;
        self.with_identity_pem(&chain_pem, &key_pem)
    }

    /// Require client certificates issued by the CAs in a PEM bundle
    pub fn with_client_ca_pem(mut self, pem: &[u8]) -> Result<Self, LinkError> {
        let store = self.client_ca.get_or_insert_with(RootCertStore::empty);
        for cert in parse_certs(pem, "client CA")? {
            store.add(cert)?;
        }
        Ok(self)
    }

    /// Require client certificates issued by the CAs in a PEM file
    pub fn with_client_ca_file(self, path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let pem = std::fs::read(path.as_ref())?;
        self.with_client_ca_pem(&pem)
    }

    /// ALPN protocols to offer (client) or select from (server)
    pub fn with_alpn<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        self.alpn_protocols = protocols.into_iter().map(|p| p.as_ref().to_vec()).collect();
        self
    }

    /// Build the context
    pub fn build(self) -> Result<SecureContext, LinkError> {
        let server = match &self.identity {
            Some((chain, key)) => Some(Arc::new(build_server_config(
                chain.clone(),
                key.clone_key(),
                self.client_ca.clone(),
                &self.alpn_protocols,
            )?)),
            None => None,
        };

        let client = if self.roots.is_empty() {
            None
        } else {
            Some(build_client_base(
                self.roots,
                self.identity,
                &self.alpn_protocols,
            )?)
        };

        info!(
            server_identity = server.is_some(),
            trust_anchors = client.is_some(),
            "Secure context created"
        );

        Ok(SecureContext {
            server,
            client,
            client_variants: Default::default(),
            alpn_protocols: self.alpn_protocols,
        })
    }
}

fn build_server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_ca: Option<RootCertStore>,
    alpn_protocols: &[Vec<u8>],
) -> Result<ServerConfig, LinkError> {
    let builder =
        ServerConfig::builder_with_provider(provider()).with_safe_default_protocol_versions()?;

    let builder = match client_ca {
        Some(roots) => {
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
                .build()
                .map_err(|e| LinkError::Context(format!("client CA: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder.with_single_cert(chain, key)?;
    config.alpn_protocols = alpn_protocols.to_vec();
    Ok(config)
}

fn build_client_base(
    roots: RootCertStore,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    alpn_protocols: &[Vec<u8>],
) -> Result<ClientBase, LinkError> {
    let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider())
        .build()
        .map_err(|e| match e {
            VerifierBuilderError::NoRootAnchors => LinkError::NoTrustAnchors,
            other => LinkError::Context(format!("trust anchors: {}", other)),
        })?;

    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_webpki_verifier(verifier.clone());

    let mut config = match identity {
        Some((chain, key)) => builder.with_client_auth_cert(chain, key)?,
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = alpn_protocols.to_vec();

    Ok(ClientBase { config, verifier })
}

fn parse_certs(pem: &[u8], what: &'static str) -> Result<Vec<CertificateDer<'static>>, LinkError> {
    let certs = rustls_pemfile::certs(&mut &*pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| LinkError::Pem { what, source })?;
    if certs.is_empty() {
        return Err(LinkError::Context(format!("no certificates found in {}", what)));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, LinkError> {
    rustls_pemfile::private_key(&mut &*pem)
        .map_err(|source| LinkError::Pem {
            what: "private key",
            source,
        })?
        .ok_or_else(|| LinkError::Context("no private key found".to_string()))
}
