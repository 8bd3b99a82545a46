//! Writer pump: owns the connection and drains the outbox onto it.
//!
//! ```text
//!   ┌───────────── connect ◄──────────── pause one period ◄────┐
//!   │   (retry each period while transient; stop if fatal)     │
//!   ▼                                                          │
//!   resubscribe ──► wait for mail ──► drain ──► heartbeat? ──► send
//!                        ▲                                     │
//!                        └──────────────── ok ─────────────────┤
//!                                                    failure ──┘
//! ```
//!
//! The writer is the only thread that installs a link, and every path out of
//! the inner loop tears the link down before the next connect.

use std::collections::{BTreeSet, LinkedList};
use std::sync::Arc;

use thiserror::Error;

use super::Shared;
use crate::data::message::{Message, MessageKind, Payload};
use crate::data::packet::FrameError;
use crate::net::link::{Connector, Link, LinkError};
use crate::runtime::clock::Timestamp;
use crate::sync::queue::Timeout;
use crate::trace::{debug, error, info, trace, warn};

/// Minimum spacing between heartbeats, in seconds.
pub const HEARTBEAT_PERIOD: f64 = 3.0;

/// Why a connected epoch ended.
#[derive(Debug, Error)]
pub(crate) enum SendError {
    #[error("batch could not be framed: {0}")]
    Frame(#[from] FrameError),
    #[error("send failed: {0}")]
    Link(#[from] LinkError),
}

pub(crate) struct WriterPump<C: Connector> {
    shared: Arc<Shared<C::Link>>,
    connector: C,
    /// Unset until the first heartbeat; survives reconnects.
    last_heartbeat: Option<Timestamp>,
    buf: Vec<u8>,
}

impl<C: Connector> WriterPump<C> {
    pub(crate) fn new(shared: Arc<Shared<C::Link>>, connector: C) -> Self {
        Self {
            shared,
            connector,
            last_heartbeat: None,
            buf: Vec::new(),
        }
    }

    /// Runs until quit is requested or the broker refuses us for good.
    pub(crate) fn run(&mut self) {
        let period = self.shared.config.wait_period();

        while !self.shared.quitting() {
            let Some(link) = self.connect() else {
                break;
            };

            self.resubscribe();

            match self.pump(&link) {
                Ok(()) => {
                    debug!("connected epoch ended");
                }
                Err(e) => {
                    warn!(error = %e, "connection lost; reconnecting");
                }
            }
            drop(link);
            self.shared.connection.close();

            if !self.shared.quitting() {
                self.shared.pause(period);
            }
        }

        self.shared.connection.close();
    }

    /// Connect attempts, one period apart, until success, quit or a fatal
    /// refusal.
    fn connect(&mut self) -> Option<Arc<C::Link>> {
        let period = self.shared.config.wait_period();
        let address = &self.shared.address;
        let mut attempts = 0u64;

        loop {
            if self.shared.quitting() {
                return None;
            }

            attempts += 1;
            self.shared.connection.begin_connect();
            match self.connector.connect(address, &self.shared.hello) {
                Ok(link) => {
                    if !self.shared.config.quiet {
                        info!(broker = %address, attempts, "connected");
                    }
                    return Some(self.shared.connection.install(link));
                }
                Err(e) if e.is_fatal() => {
                    self.shared.connection.abort_connect();
                    error!(broker = %address, error = %e, "broker refused session; giving up");
                    self.shared.request_quit();
                    return None;
                }
                Err(e) => {
                    self.shared.connection.abort_connect();
                    debug!(broker = %address, attempts, error = %e, "connect failed");
                    self.shared.pause(period);
                }
            }
        }
    }

    /// Puts a `Register` for every subscribed key ahead of pending mail.
    ///
    /// Keys already queued for registration are not repeated.
    fn resubscribe(&self) {
        let keys = self.shared.subscriptions.lock().clone();
        if keys.is_empty() {
            return;
        }
        let now = self.shared.clock.now();

        self.shared.outbox.with_locked(|items, _| {
            let queued: BTreeSet<&str> = items
                .iter()
                .filter(|m| m.kind == MessageKind::Register)
                .map(|m| m.key.as_str())
                .collect();
            let mut registers: LinkedList<Message> = keys
                .iter()
                .filter(|key| !queued.contains(key.as_str()))
                .map(|key| Message::new(MessageKind::Register, key.as_str(), Payload::Empty, now))
                .collect();
            registers.append(items);
            *items = registers;
        });
    }

    /// One connected epoch. Returns `Ok` when quit or an external close ends it.
    fn pump(&mut self, link: &C::Link) -> Result<(), SendError> {
        let period = self.shared.config.wait_period();

        loop {
            if self.shared.quitting() || !self.shared.connection.is_connected() {
                return Ok(());
            }
            if !link.is_open() {
                return Err(LinkError::Closed.into());
            }

            if self.shared.outbox.is_empty() {
                self.shared.outbox.wait_for_push(Timeout::Duration(period));
                if self.shared.quitting() {
                    return Ok(());
                }
            }

            let mut batch = self.shared.outbox.drain_all();
            let now = self.shared.clock.now();
            if self.heartbeat_due(now) {
                batch.push_front(Message::heartbeat(now));
                self.last_heartbeat = Some(now);
            }
            if batch.is_empty() {
                continue;
            }

            if let Err(e) = self.shared.codec.encode(&batch, &mut self.buf) {
                warn!(messages = batch.len(), "dropping batch that cannot be framed");
                return Err(e.into());
            }
            link.send(&self.buf)?;
            trace!(messages = batch.len(), bytes = self.buf.len(), "packet sent");
        }
    }

    fn heartbeat_due(&self, now: Timestamp) -> bool {
        self.last_heartbeat
            .is_none_or(|last| now.secs_since(last) > HEARTBEAT_PERIOD)
    }
}
