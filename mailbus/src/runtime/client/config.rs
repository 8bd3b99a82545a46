//! Client configuration.
//!
//! # Tuning Guidelines
//!
//! - **fundamental_frequency** bounds publish latency: an idle writer wakes
//!   every `1 / frequency` seconds, and a post lands on the wire within that
//!   window at worst. Higher rates cost idle CPU.
//! - **receive_timeout** bounds how long the reader takes to notice shutdown
//!   when the broker is quiet.
//! - **inbound_pending_limit** caps the mailbox of a client that stops
//!   fetching. Exceeding it discards everything pending.

use std::time::Duration;

use thiserror::Error;

use crate::data::packet::DEFAULT_MAX_PACKET_SIZE;
use crate::net::endpoint::BrokerAddress;
use crate::net::link::TcpConnector;

/// Valid range for [`ClientConfig::fundamental_frequency`], in Hz.
pub const FREQUENCY_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("fundamental frequency {0} Hz outside 1..=1000")]
    Frequency(u32),
    #[error("client name must not be empty")]
    EmptyName,
    #[error("broker host must not be empty")]
    EmptyHost,
    #[error("inbound pending limit must be > 0")]
    PendingLimit,
    #[error("{0} must be non-zero")]
    ZeroTimeout(&'static str),
    #[error("max packet size must be > 0")]
    PacketSize,
}

/// Configuration for a [`Client`](super::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker host name or IP literal.
    ///
    /// **Default**: `localhost`
    pub host: String,

    /// **Default**: 9000
    pub port: u16,

    /// Name the broker knows this client by.
    pub name: String,

    /// Writer loop rate in Hz.
    ///
    /// **Default**: 20
    pub fundamental_frequency: u32,

    /// Mailbox size beyond which an arriving packet purges everything pending.
    ///
    /// **Default**: 1000
    pub inbound_pending_limit: usize,

    /// Estimate broker clock skew from timing traffic.
    ///
    /// **Default**: true
    pub local_time_correction: bool,

    /// Suppress the startup banner and routine lifecycle logs.
    ///
    /// **Default**: false
    pub quiet: bool,

    /// **Default**: 2s
    pub connect_timeout: Duration,

    /// How long to wait for the broker's reply to our hello.
    ///
    /// **Default**: 2s
    pub handshake_timeout: Duration,

    /// How long one reader receive blocks.
    ///
    /// **Default**: 500ms
    pub receive_timeout: Duration,

    /// Largest packet body sent or accepted.
    ///
    /// **Default**: 4 MiB
    pub max_packet_size: usize,

    /// Kernel socket buffer size; system default when `None`.
    pub socket_buffer_size: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 9000,
            name: "mailbus-client".to_owned(),
            fundamental_frequency: 20,
            inbound_pending_limit: 1000,
            local_time_correction: true,
            quiet: false,
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            receive_timeout: Duration::from_millis(500),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            socket_buffer_size: None,
        }
    }
}

impl ClientConfig {
    /// Default configuration under the given client name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Checks every field against its valid range.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !FREQUENCY_RANGE.contains(&self.fundamental_frequency) {
            return Err(ConfigError::Frequency(self.fundamental_frequency));
        }
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.inbound_pending_limit == 0 {
            return Err(ConfigError::PendingLimit);
        }
        for (name, value) in [
            ("connect timeout", self.connect_timeout),
            ("handshake timeout", self.handshake_timeout),
            ("receive timeout", self.receive_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        if self.max_packet_size == 0 {
            return Err(ConfigError::PacketSize);
        }
        Ok(())
    }

    /// One fundamental period: the writer's idle wait and the reconnect delay.
    #[must_use]
    pub fn wait_period(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fundamental_frequency.max(1)))
    }

    #[must_use]
    pub fn broker_address(&self) -> BrokerAddress {
        BrokerAddress::new(self.host.clone(), self.port)
    }

    /// TCP connector honouring this configuration's timeouts and limits.
    #[must_use]
    pub fn tcp_connector(&self) -> TcpConnector {
        TcpConnector::new()
            .with_connect_timeout(self.connect_timeout)
            .with_handshake_timeout(self.handshake_timeout)
            .with_receive_timeout(self.receive_timeout)
            .with_max_frame(self.max_packet_size)
            .with_socket_buffer_size(self.socket_buffer_size)
    }
}

impl ClientConfig {
    #[must_use]
    pub fn with_broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_fundamental_frequency(mut self, hz: u32) -> Self {
        self.fundamental_frequency = hz;
        self
    }

    #[must_use]
    pub const fn with_inbound_pending_limit(mut self, limit: usize) -> Self {
        self.inbound_pending_limit = limit;
        self
    }

    #[must_use]
    pub const fn with_local_time_correction(mut self, enabled: bool) -> Self {
        self.local_time_correction = enabled;
        self
    }

    #[must_use]
    pub const fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    #[must_use]
    pub const fn with_socket_buffer_size(mut self, size: Option<usize>) -> Self {
        self.socket_buffer_size = size;
        self
    }
}
