//! Protocol types for the client-broker hello exchange.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::packet::FrameError;
use crate::net::link::LinkError;

/// Token selecting the asynchronous protocol variant at connect time.
pub const HANDSHAKE_KEY: &str = "asynchronous";

/// Unique identifier for a client connection.
///
/// Combines the process ID with a random nonce so two clients in one process,
/// or a reused PID, still tell apart on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId {
    pid: u32,
    nonce: u32,
}

impl ClientId {
    /// Generates a new unique client ID for the current process.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            pid: std::process::id(),
            nonce: rand::random(),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:04x}", self.pid, self.nonce)
    }
}

/// First frame a client sends on a fresh connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Protocol selector; always [`HANDSHAKE_KEY`] from this crate.
    pub token: String,
    /// Client name as the broker should know it.
    pub name: String,
    pub id: ClientId,
}

impl ClientHello {
    /// Hello for `name` with a fresh ID.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            token: HANDSHAKE_KEY.to_owned(),
            name: name.into(),
            id: ClientId::generate(),
        }
    }
}

/// Broker's answer to a [`ClientHello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerReply {
    /// Session established.
    Welcome,
    /// Broker refused the client.
    Rejected { reason: String },
}

/// Errors that can occur while establishing a broker session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Name resolution or TCP connect failed.
    #[error("broker unreachable: {0}")]
    Unreachable(io::Error),
    /// Timed out waiting for the broker's reply.
    #[error("timed out waiting for broker reply")]
    Timeout,
    /// Broker answered with something other than a reply.
    #[error("protocol violation")]
    ProtocolViolation,
    #[error("broker rejected client: {0}")]
    Rejected(String),
    #[error("link error during handshake: {0}")]
    Link(#[from] LinkError),
    #[error("hello encoding failed: {0}")]
    Frame(#[from] FrameError),
}

impl ConnectError {
    /// Whether retrying is pointless.
    ///
    /// A broker that misbehaves or refuses us will do so again; everything
    /// else may clear up on its own.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation | Self::Rejected(_))
    }
}
