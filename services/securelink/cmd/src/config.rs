//! Configuration handling for the securelink service.
//!
//! Settings come from the shared YAML config file, then `SECURELINK_*`
//! environment variables, then command line flags (applied in `main`).

use anyhow::{Context, Result};
use link_session::{DialFlags, DialPolicy, SecureContext};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Securelink service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Network kind: tcp, tcp4 or tcp6
    pub network: String,
    /// Address the listener binds to
    pub listen_addr: String,
    /// Address the dialer connects to
    pub connect_addr: String,
    /// Dial budget covering connect and handshake (zero = none)
    pub dial_timeout: Duration,
    /// Server handshake bound (zero = none)
    pub handshake_timeout: Duration,
    /// ALPN protocols, in preference order
    pub alpn: Vec<String>,
    /// Accept server certificates whose names do not match the host
    pub skip_host_verification: bool,
    /// Do not send the hostname indication
    pub disable_sni: bool,
    /// TLS material
    pub tls: TlsConfig,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate chain file
    pub cert_file: String,
    /// Path to private key file
    pub key_file: String,
    /// Path to CA certificate file trusted when dialing
    pub ca_file: String,
    /// Path to CA certificate file required of clients
    pub client_ca_file: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            listen_addr: ":8443".to_string(),
            connect_addr: "localhost:8443".to_string(),
            dial_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            alpn: Vec::new(),
            skip_host_verification: false,
            disable_sni: false,
            tls: TlsConfig::default(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    securelink: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl LinkConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}, using defaults: {}",
                        config_path.as_ref(),
                        e
                    );
                }
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Final securelink configuration: network={}, listen={}, connect={}, dial_timeout={:?}",
            config.network, config.listen_addr, config.connect_addr, config.dial_timeout
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(service) = root_config.services.and_then(|s| s.securelink) {
            self.apply_service_config(service);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        for arg in service_config.args.unwrap_or_default() {
            if let Some(addr) = arg.strip_prefix("--listen=") {
                self.listen_addr = addr.to_string();
            } else if let Some(addr) = arg.strip_prefix("--connect=") {
                self.connect_addr = addr.to_string();
            } else if let Some(network) = arg.strip_prefix("--network=") {
                self.network = network.to_string();
            }
        }

        for (key, value) in service_config.config.unwrap_or_default() {
            match key.strip_prefix("services.securelink.") {
                Some(key) => self.set(key, value),
                None => warn!("Ignoring configuration key {}", key),
            }
        }
    }

    /// Apply `SECURELINK_*` overrides, looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        const KEYS: &[&str] = &[
            "network",
            "listen_addr",
            "connect_addr",
            "dial_timeout",
            "handshake_timeout",
            "alpn",
            "skip_host_verification",
            "disable_sni",
            "tls.cert_file",
            "tls.key_file",
            "tls.ca_file",
            "tls.client_ca_file",
        ];

        for key in KEYS {
            let var = format!("SECURELINK_{}", key.replace('.', "_").to_uppercase());
            if let Some(value) = lookup(&var) {
                info!("{} overridden by environment", key);
                self.set(key, value);
            }
        }
    }

    fn set(&mut self, key: &str, value: String) {
        match key {
            "network" => self.network = value,
            "listen_addr" => self.listen_addr = value,
            "connect_addr" => self.connect_addr = value,
            "dial_timeout" => match parse_budget(&value) {
                Some(timeout) => self.dial_timeout = timeout,
                None => warn!("Invalid dial_timeout {:?}, keeping {:?}", value, self.dial_timeout),
            },
            "handshake_timeout" => match parse_budget(&value) {
                Some(timeout) => self.handshake_timeout = timeout,
                None => warn!(
                    "Invalid handshake_timeout {:?}, keeping {:?}",
                    value, self.handshake_timeout
                ),
            },
            "alpn" => {
                self.alpn = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect();
            }
            "skip_host_verification" => {
                self.skip_host_verification = value.to_lowercase() == "true";
            }
            "disable_sni" => self.disable_sni = value.to_lowercase() == "true",
            "tls.cert_file" => self.tls.cert_file = value,
            "tls.key_file" => self.tls.key_file = value,
            "tls.ca_file" => self.tls.ca_file = value,
            "tls.client_ca_file" => self.tls.client_ca_file = value,
            _ => {
                // Ignore unknown configuration keys
            }
        }
    }

    /// Flags for outbound dials
    pub fn dial_flags(&self) -> DialFlags {
        let mut flags = DialFlags::empty();
        flags.set(DialFlags::INSECURE_SKIP_HOST_VERIFICATION, self.skip_host_verification);
        flags.set(DialFlags::DISABLE_SNI, self.disable_sni);
        flags
    }

    /// Dial policy from the configured budget
    pub fn dial_policy(&self) -> DialPolicy {
        let policy = DialPolicy::default();
        if self.dial_timeout.is_zero() {
            policy
        } else {
            policy.with_timeout(self.dial_timeout)
        }
    }

    /// Server handshake bound, if any
    pub fn handshake_timeout(&self) -> Option<Duration> {
        Some(self.handshake_timeout).filter(|t| !t.is_zero())
    }

    /// Context for the listener: requires a certificate and key
    pub fn server_context(&self) -> Result<Arc<SecureContext>> {
        if self.tls.cert_file.is_empty() || self.tls.key_file.is_empty() {
            anyhow::bail!("listening requires tls.cert_file and tls.key_file");
        }

        let mut builder = SecureContext::builder()
            .with_identity_files(&self.tls.cert_file, &self.tls.key_file)
            .with_context(|| format!("Failed to load identity from {}", self.tls.cert_file))?
            .with_alpn(&self.alpn);
        if !self.tls.client_ca_file.is_empty() {
            builder = builder
                .with_client_ca_file(&self.tls.client_ca_file)
                .with_context(|| format!("Failed to load client CA {}", self.tls.client_ca_file))?;
        }
        Ok(Arc::new(builder.build()?))
    }

    /// Context for dialing; `None` selects the default context
    pub fn client_context(&self) -> Result<Option<Arc<SecureContext>>> {
        let has_identity = !self.tls.cert_file.is_empty() && !self.tls.key_file.is_empty();
        if self.tls.ca_file.is_empty() && !has_identity && self.alpn.is_empty() {
            return Ok(None);
        }

        let mut builder = if self.tls.ca_file.is_empty() {
            SecureContext::builder().with_webpki_roots()
        } else {
            SecureContext::builder()
                .with_root_file(&self.tls.ca_file)
                .with_context(|| format!("Failed to load CA {}", self.tls.ca_file))?
        };
        if has_identity {
            builder = builder
                .with_identity_files(&self.tls.cert_file, &self.tls.key_file)
                .with_context(|| format!("Failed to load identity from {}", self.tls.cert_file))?;
        }
        Ok(Some(Arc::new(builder.with_alpn(&self.alpn).build()?)))
    }
}

/// Bare numbers are seconds; anything else is a humantime duration (`500ms`, `1m`)
fn parse_budget(value: &str) -> Option<Duration> {
    let value = value.trim();
    match value.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => humantime::parse_duration(value).ok(),
    }
}
