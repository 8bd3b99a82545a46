//! Asynchronous client for a publish/subscribe message bus.
//!
//! A [`Client`] keeps one TCP session to a broker alive across failures.
//! Publishing appends to an outbox and returns; a writer thread batches the
//! outbox onto the wire. A reader thread files inbound packets in a mailbox
//! the application drains with [`Client::fetch`], and estimates the broker's
//! clock offset from timing traffic on the way.

// Bindings that only feed log fields go unused when logging compiles out.
#![cfg_attr(not(feature = "tracing"), allow(unused_variables))]

pub mod control;
pub mod data;
pub mod net;
pub mod runtime;
pub mod sync;
mod trace;

pub use data::{Message, MessageKind, Payload};
pub use runtime::client::{
    Client, ClientConfig, ClientError, ConfigError, ConnectionState, MailHook,
};
pub use runtime::clock::Timestamp;
pub use sync::queue::Timeout;
pub use trace::init_tracing;
