//! Destination address parsing.
//!
//! Addresses use the familiar `host:port` form. IPv6 literals must be
//! bracketed (`[::1]:443`). Parsing never touches the network.

use std::fmt;
use std::str::FromStr;

use crate::error::AddrError;

/// Split `addr` into its host and port parts without validating either.
///
/// Brackets around an IPv6 host are removed. An empty host (`:8080`) is
/// returned as-is so listeners can interpret it as "all interfaces".
pub fn split_host_port(addr: &str) -> Result<(&str, &str), AddrError> {
    let err = |f: fn(String) -> AddrError| Err(f(addr.to_string()));

    let Some(last_colon) = addr.rfind(':') else {
        return err(AddrError::MissingPort);
    };

    let (host, host_start, host_end) = if addr.starts_with('[') {
        let Some(close) = addr.find(']') else {
            return err(AddrError::MissingBracket);
        };
        match close + 1 {
            n if n == addr.len() => return err(AddrError::MissingPort),
            n if n == last_colon => {}
            n if addr.as_bytes()[n] == b':' => return err(AddrError::TooManyColons),
            _ => return err(AddrError::MissingPort),
        }
        (&addr[1..close], 1, close + 1)
    } else {
        let host = &addr[..last_colon];
        if host.contains(':') {
            return err(AddrError::TooManyColons);
        }
        (host, 0, 0)
    };

    if addr[host_start..].contains('[') {
        return err(AddrError::UnexpectedOpenBracket);
    }
    if addr[host_end..].contains(']') {
        return err(AddrError::UnexpectedCloseBracket);
    }

    Ok((host, &addr[last_colon + 1..]))
}

/// A parsed dial destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    /// Parse `host:port`, requiring a non-empty host and a numeric port
    pub fn parse(addr: &str) -> Result<Self, AddrError> {
        let (host, port) = split_host_port(addr)?;
        if host.is_empty() {
            return Err(AddrError::MissingHost(addr.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddrError::InvalidPort(addr.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Host part, without IPv6 brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for HostPort {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
