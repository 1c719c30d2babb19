//! Securelink binary.
//!
//! Runs a TLS echo listener or dials one, exercising the secure listener
//! wrapper and the budgeted dialer end to end.

use anyhow::Context;
use clap::{Parser, Subcommand};
use link_session::{describe_certificate, Dialer, SecureSession};
use link_transport::RawConnection;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::LinkConfig;
use logging::LinkLogFormatter;

/// Secure connection establishment tool
#[derive(Parser, Debug)]
#[command(name = "securelink", version, about = "TLS listener and dialer with a shared timeout budget")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "securelink.yaml", global = true)]
    config: PathBuf,

    /// Network kind: tcp, tcp4 or tcp6
    #[arg(long, global = true)]
    network: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept secure sessions and echo what they send
    Listen {
        /// Listen address, e.g. :8443 or 127.0.0.1:8443
        #[arg(long)]
        addr: Option<String>,

        /// Bound on each server handshake, e.g. 10s
        #[arg(long)]
        handshake_timeout: Option<humantime::Duration>,

        /// Path to TLS certificate chain (PEM)
        #[arg(long)]
        tls_cert: Option<String>,

        /// Path to TLS private key (PEM)
        #[arg(long)]
        tls_key: Option<String>,

        /// Require client certificates issued by this CA (PEM)
        #[arg(long)]
        tls_client_ca: Option<String>,
    },

    /// Dial a secure session, send a message and print the reply
    Dial {
        /// Destination, e.g. localhost:8443
        #[arg(long)]
        addr: Option<String>,

        /// Budget for connect plus handshake, e.g. 5s
        #[arg(long)]
        timeout: Option<humantime::Duration>,

        /// CA certificate to trust (PEM); bundled roots otherwise
        #[arg(long)]
        tls_ca: Option<String>,

        /// Accept a trusted certificate whose names do not match the host
        #[arg(long)]
        insecure_skip_host_verification: bool,

        /// Do not send the hostname indication
        #[arg(long)]
        disable_sni: bool,

        /// Message to send; stdin is read when absent
        #[arg(long)]
        message: Option<String>,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("securelink={}", args.log_level).parse()?)
        .add_directive(format!("link_session={}", args.log_level).parse()?)
        .add_directive(format!("link_transport={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(LinkLogFormatter::new("securelink"))
        .init();

    info!("Starting securelink v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LinkConfig::load_from_file(&args.config)?;
    if let Some(network) = args.network {
        config.network = network;
    }

    match args.command {
        Command::Listen {
            addr,
            handshake_timeout,
            tls_cert,
            tls_key,
            tls_client_ca,
        } => {
            if let Some(addr) = addr {
                config.listen_addr = addr;
            }
            if let Some(timeout) = handshake_timeout {
                config.handshake_timeout = timeout.into();
            }
            if let Some(cert) = tls_cert {
                config.tls.cert_file = cert;
            }
            if let Some(key) = tls_key {
                config.tls.key_file = key;
            }
            if let Some(ca) = tls_client_ca {
                config.tls.client_ca_file = ca;
            }
            run_listener(&config).await
        }
        Command::Dial {
            addr,
            timeout,
            tls_ca,
            insecure_skip_host_verification,
            disable_sni,
            message,
        } => {
            if let Some(addr) = addr {
                config.connect_addr = addr;
            }
            if let Some(timeout) = timeout {
                config.dial_timeout = timeout.into();
            }
            if let Some(ca) = tls_ca {
                config.tls.ca_file = ca;
            }
            config.skip_host_verification |= insecure_skip_host_verification;
            config.disable_sni |= disable_sni;
            run_dial(&config, message).await
        }
    }
}

async fn run_listener(config: &LinkConfig) -> anyhow::Result<()> {
    let ctx = config.server_context()?;
    let mut listener = link_session::listen(&config.network, &config.listen_addr, Some(ctx))
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen_addr))?;
    if let Some(timeout) = config.handshake_timeout() {
        listener = listener.with_handshake_timeout(timeout);
    }
    component_info!("listen", "Listening on {}", listener.local_addr()?);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(session) => {
                    tokio::spawn(echo(session));
                }
                Err(e) if e.is_timeout() => {
                    component_debug!("listen", "Handshake timed out: {}", e);
                }
                Err(e) => {
                    component_warn!("listen", "Rejected connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    info!("Listener stopped");
    Ok(())
}

async fn echo<C: RawConnection>(session: SecureSession<C>) {
    let peer = session
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let subject = session
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(|leaf| describe_certificate(leaf).ok())
        .map(|info| info.subject);
    component_info!(
        "echo",
        "Session from {} (client certificate: {})",
        peer,
        subject.as_deref().unwrap_or("none")
    );

    let (mut reader, mut writer) = tokio::io::split(session);
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => {
            if let Err(e) = writer.shutdown().await {
                component_debug!("echo", "Shutdown for {} failed: {}", peer, e);
            }
            component_info!("echo", "Session from {} closed after {} bytes", peer, bytes);
        }
        Err(e) => component_error!("echo", "Session from {} failed: {}", peer, e),
    }
}

async fn run_dial(config: &LinkConfig, message: Option<String>) -> anyhow::Result<()> {
    let ctx = config.client_context()?;
    let dialer = Dialer::new(config.dial_policy());
    let mut session = dialer
        .dial(&config.network, &config.connect_addr, ctx, config.dial_flags())
        .await
        .with_context(|| format!("Failed to dial {}", config.connect_addr))?;

    let server = session
        .peer_certificates()
        .and_then(|chain| chain.first())
        .map(|leaf| describe_certificate(leaf))
        .transpose()?;
    component_info!(
        "dial",
        "Connected to {} using {:?}, ALPN {:?}",
        config.connect_addr,
        session.protocol_version(),
        session.alpn_protocol().map(String::from_utf8_lossy)
    );
    if let Some(server) = server {
        component_info!(
            "dial",
            "Server certificate {} issued by {} for {:?}",
            server.subject,
            server.issuer,
            server.dns_names
        );
    }

    // The budget covered establishment only
    session.set_deadline(None);

    let payload = match message {
        Some(message) => message.into_bytes(),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("Failed to read stdin")?;
            buf
        }
    };

    session.write_all(&payload).await?;
    session.shutdown().await?;

    let mut reply = Vec::new();
    session.read_to_end(&mut reply).await?;
    println!("{}", String::from_utf8_lossy(&reply));

    info!("Dial complete, {} bytes echoed", reply.len());
    Ok(())
}
