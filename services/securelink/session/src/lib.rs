//! Secure session establishment for securelink.
//!
//! This crate upgrades raw byte-stream connections into TLS sessions. It
//! owns the timing, option and failure semantics around the upgrade and
//! leaves the protocol itself to rustls.
//!
//! ## Features
//!
//! - **Listener wrapper**: [`SecureListener`] only ever yields completed server sessions
//! - **Dialer**: [`Dialer`], [`dial`] and [`dial_with_policy`] bound the connect and
//!   the handshake by one timeout budget
//! - **Dial flags**: [`DialFlags`] to skip hostname verification or omit SNI
//! - **Contexts**: [`SecureContext`] holds certificates, keys and protocol policy
//!
//! Every failure that happens after a raw connection exists closes that
//! connection before the error is returned.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cert;
pub mod context;
pub mod dialer;
pub mod engine;
pub mod error;
pub mod flags;
pub mod listener;
pub mod stream;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use cert::{describe_certificate, CertificateInfo};
pub use context::{SecureContext, SecureContextBuilder};
pub use dialer::{dial, dial_with_policy, Dialer};
pub use error::LinkError;
pub use flags::DialFlags;
pub use listener::{listen, SecureListener};
pub use stream::{SecureSession, Side};

pub use link_transport::{DialPolicy, Network};
