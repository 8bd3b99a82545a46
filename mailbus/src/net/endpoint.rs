//! Broker address types.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Host name (or literal IP) and port of a broker.
///
/// Resolution is deferred to connect time so a broker that moves between
/// addresses is picked up on the next reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    host: String,
    port: u16,
}

impl BrokerAddress {
    /// Creates an address from a host name and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// A broker on this machine.
    #[must_use]
    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }

    /// Returns the host part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Resolves to every socket address the host maps to.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails or yields nothing.
    pub fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<_> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {self}"),
            ));
        }
        Ok(addrs)
    }
}

impl From<SocketAddr> for BrokerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
