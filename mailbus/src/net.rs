//! Network transport primitives.
//!
//! Blocking TCP links with length-prefixed frames. Everything above this
//! layer goes through the [`Connector`] and [`Link`] traits, so tests and
//! alternative transports plug in without touching the pumps.

pub mod endpoint;
pub mod link;

pub use endpoint::BrokerAddress;
pub use link::{Connector, Link, LinkError, TcpConnector, TcpLink};
