//! Transport error types.

use thiserror::Error;

/// Errors produced while parsing a `host:port` destination
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    /// No `:port` suffix
    #[error("address {0}: missing port in address")]
    MissingPort(String),

    /// Opening `[` without a closing `]`
    #[error("address {0}: missing ']' in address")]
    MissingBracket(String),

    /// Unbracketed IPv6 literal or stray colons
    #[error("address {0}: too many colons in address")]
    TooManyColons(String),

    /// `[` found outside the host part
    #[error("address {0}: unexpected '[' in address")]
    UnexpectedOpenBracket(String),

    /// `]` found outside the host part
    #[error("address {0}: unexpected ']' in address")]
    UnexpectedCloseBracket(String),

    /// Empty host part
    #[error("address {0}: missing host in address")]
    MissingHost(String),

    /// Port is not a number in 0..=65535
    #[error("address {0}: invalid port")]
    InvalidPort(String),
}

/// Network name not recognised by the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown network {0}")]
pub struct UnknownNetwork(pub String);
