//! Session establishment: the hello a client opens with and the broker's
//! reply.

pub mod handshake;
pub mod types;

pub use types::{BrokerReply, ClientHello, ClientId, ConnectError, HANDSHAKE_KEY};
