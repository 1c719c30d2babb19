//! Raw transport for securelink.
//!
//! This crate provides the unencrypted layer that secure sessions are built
//! on: TCP listeners and dialers, connections that carry an absolute I/O
//! deadline, destination parsing and the dial timeout budget.
//!
//! ## Features
//!
//! - **Raw connections**: [`RawConnection`] with deadlines and explicit close
//! - **Listeners**: [`RawListener`] and the TCP [`listen`] helper
//! - **Dialers**: [`RawDialer`] and [`TcpDialer`], bounded by a [`DialPolicy`]
//! - **Deadlines**: [`DeadlineStream`] turns an elapsed deadline into `TimedOut`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addr;
pub mod conn;
pub mod deadline;
pub mod dialer;
pub mod error;
pub mod listener;
pub mod network;

pub use addr::{split_host_port, HostPort};
pub use conn::{RawConnection, TcpConnection};
pub use deadline::{deadline_exceeded, DeadlineStream};
pub use dialer::{DialPolicy, RawDialer, TcpDialer};
pub use error::{AddrError, UnknownNetwork};
pub use listener::{listen, RawListener, TcpRawListener};
pub use network::Network;
