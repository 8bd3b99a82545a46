//! Client runtime: a broker session driven by a writer and a reader thread.
//!
//! # Architecture
//!
//! ```text
//!   application threads                      broker
//!        │ post                                 ▲
//!        ▼                                      │ send
//!   ┌─────────┐  drain   ┌────────────────┐     │
//!   │ outbox  │ ───────► │ mailbus-writer │ ────┘   connect / reconnect,
//!   └─────────┘          └────────────────┘         heartbeat, teardown
//!                                │ installs
//!                                ▼
//!                         ┌────────────┐
//!                         │ Connection │  state + link slot + close lock
//!                         └────────────┘
//!                                │ borrows
//!                                ▼
//!   ┌─────────┐  file    ┌────────────────┐  recv
//!   │ mailbox │ ◄─────── │ mailbus-reader │ ◄──────── broker
//!   └─────────┘          └────────────────┘
//!        │ fetch / mail hook
//!        ▼
//!   application threads
//! ```
//!
//! The pumps never call each other. They share the connection and the two
//! queues, and no code path holds both queue locks at once.
//!
//! # Example
//!
//! ```no_run
//! use mailbus::runtime::client::{Client, ClientConfig};
//!
//! let mut client = Client::new(ClientConfig::new("pLogger").with_broker("localhost", 9000))?;
//! client.register("NAV_X");
//! client.start()?;
//!
//! client.notify("LOGGER_STATUS", "running");
//! for mail in client.fetch() {
//!     println!("{mail}");
//! }
//!
//! client.shutdown();
//! # Ok::<(), mailbus::runtime::client::ClientError>(())
//! ```

pub mod config;
pub mod connection;
mod reader;
#[cfg(test)]
mod testing;
mod writer;

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use minstant::Instant;
use parking_lot::{Condvar, Mutex, RwLock};
use thiserror::Error;

pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionState};
pub use reader::IDLE_POLL;
pub use writer::HEARTBEAT_PERIOD;

use reader::{Inbound, ReaderPump};
use writer::WriterPump;

use crate::control::types::{ClientHello, ClientId, HANDSHAKE_KEY};
use crate::data::message::{Message, MessageKind, Payload};
use crate::data::packet::PacketCodec;
use crate::net::endpoint::BrokerAddress;
use crate::net::link::{Connector, Link, TcpConnector};
use crate::runtime::clock::{LocalClock, Timestamp};
use crate::sync::queue::{MessageQueue, Timeout};
use crate::trace::{debug, info, trace};

/// Callback run on the reader thread after a packet leaves mail pending.
///
/// Keep it short: the reader files nothing else while it runs. Returning
/// `false` is logged and otherwise ignored.
pub trait MailHook: Send + Sync + 'static {
    fn on_mail(&self) -> bool;
}

impl<F> MailHook for F
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    fn on_mail(&self) -> bool {
        self()
    }
}

/// Error starting a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn client thread: {0}")]
    Spawn(io::Error),
    /// `start` was already called on this client.
    #[error("client already started")]
    AlreadyRunning,
}

/// State shared by the facade and both pumps.
pub(crate) struct Shared<L> {
    pub(crate) config: ClientConfig,
    pub(crate) address: BrokerAddress,
    pub(crate) hello: ClientHello,
    pub(crate) codec: PacketCodec,
    pub(crate) clock: LocalClock,
    pub(crate) connection: Connection<L>,
    pub(crate) outbox: MessageQueue<Message>,
    pub(crate) mailbox: MessageQueue<Message, Inbound>,
    pub(crate) subscriptions: Mutex<BTreeSet<String>>,
    pub(crate) hook: RwLock<Option<Arc<dyn MailHook>>>,
    pub(crate) posted: AtomicU64,
    quit: AtomicBool,
    quit_lock: Mutex<()>,
    quit_signal: Condvar,
}

impl<L: Link> Shared<L> {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            address: config.broker_address(),
            hello: ClientHello::new(config.name.clone()),
            codec: PacketCodec::new(config.max_packet_size),
            clock: LocalClock::new(),
            connection: Connection::new(),
            outbox: MessageQueue::new(),
            mailbox: MessageQueue::with_side(Inbound::default()),
            subscriptions: Mutex::new(BTreeSet::new()),
            hook: RwLock::new(None),
            posted: AtomicU64::new(0),
            quit: AtomicBool::new(false),
            quit_lock: Mutex::new(()),
            quit_signal: Condvar::new(),
            config,
        }
    }

    #[inline]
    pub(crate) fn quitting(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Stops both pumps: wakes the writer's outbox wait and any pause.
    pub(crate) fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
        drop(self.quit_lock.lock());
        self.quit_signal.notify_all();
        self.outbox.wake_all();
    }

    /// Sleeps for `period`, returning early only on quit.
    pub(crate) fn pause(&self, period: Duration) {
        let deadline = Instant::now() + period;
        let mut guard = self.quit_lock.lock();
        while !self.quitting() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            self.quit_signal.wait_for(&mut guard, remaining);
        }
    }
}

/// Handle to a broker session.
///
/// Dropping the handle signals both threads to stop and closes the link but
/// does not wait for them. Use [`Client::shutdown`] to join.
pub struct Client<C: Connector = TcpConnector> {
    shared: Arc<Shared<C::Link>>,
    connector: Option<C>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Client<TcpConnector> {
    /// Creates a TCP client. No threads run until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let connector = config.tcp_connector();
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> Client<C> {
    /// Creates a client that opens links through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the configuration is invalid.
    pub fn with_connector(config: ClientConfig, connector: C) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config)),
            connector: Some(connector),
            writer: None,
            reader: None,
        })
    }

    /// Token sent in every hello.
    #[must_use]
    pub const fn handshake_key() -> &'static str {
        HANDSHAKE_KEY
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Identity sent to the broker.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.shared.hello.id
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Spawns the writer and reader threads.
    ///
    /// If either thread fails to spawn, the other is stopped and joined
    /// before returning, so nothing is left running.
    ///
    /// # Errors
    ///
    /// [`ClientError::AlreadyRunning`] on a second call and
    /// [`ClientError::Spawn`] if the OS refuses a thread.
    pub fn start(&mut self) -> Result<(), ClientError> {
        let Some(connector) = self.connector.take() else {
            return Err(ClientError::AlreadyRunning);
        };

        let config = &self.shared.config;
        if !config.quiet {
            info!(
                name = %config.name,
                id = %self.shared.hello.id,
                broker = %self.shared.address,
                frequency_hz = config.fundamental_frequency,
                time_correction = config.local_time_correction,
                "mailbus client starting"
            );
        }

        debug!("spawning reader thread");
        let shared = Arc::clone(&self.shared);
        let reader = thread::Builder::new()
            .name("mailbus-reader".into())
            .spawn(move || {
                debug!("reader thread started");
                ReaderPump::new(shared).run();
                debug!("reader thread exiting");
            });
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                self.connector = Some(connector);
                return Err(ClientError::Spawn(e));
            }
        };

        debug!("spawning writer thread");
        let shared = Arc::clone(&self.shared);
        let writer = thread::Builder::new()
            .name("mailbus-writer".into())
            .spawn(move || {
                debug!("writer thread started");
                WriterPump::new(shared, connector).run();
                debug!("writer thread exiting");
            });
        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.request_quit();
                let _ = reader.join();
                return Err(ClientError::Spawn(e));
            }
        };

        self.reader = Some(reader);
        self.writer = Some(writer);
        Ok(())
    }

    /// Queues a message for the writer. Never blocks on the network.
    ///
    /// `Register` and `Unregister` messages also update the subscription
    /// table replayed after every reconnect. Mail posted once the client is
    /// stopping is dropped.
    pub fn post(&self, message: Message) {
        if self.shared.quitting() {
            trace!(key = %message.key, "client stopping; post dropped");
            return;
        }
        match message.kind {
            MessageKind::Register => {
                self.shared.subscriptions.lock().insert(message.key.clone());
            }
            MessageKind::Unregister => {
                self.shared.subscriptions.lock().remove(&message.key);
            }
            _ => {}
        }
        self.shared.posted.fetch_add(1, Ordering::Relaxed);
        self.shared.outbox.push(message);
    }

    /// Publishes `value` under `key`, stamped with local time.
    pub fn notify(&self, key: impl Into<String>, value: impl Into<Payload>) {
        let now = self.shared.clock.now();
        self.post(Message::notify(key, value, now));
    }

    /// Subscribes to `key`, now and after every reconnect.
    pub fn register(&self, key: impl Into<String>) {
        let now = self.shared.clock.now();
        self.post(Message::new(MessageKind::Register, key, Payload::Empty, now));
    }

    pub fn unregister(&self, key: impl Into<String>) {
        let now = self.shared.clock.now();
        self.post(Message::new(MessageKind::Unregister, key, Payload::Empty, now));
    }

    /// Keys currently subscribed.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.subscriptions.lock().iter().cloned().collect()
    }

    /// Messages accepted by [`post`](Self::post) so far.
    #[must_use]
    pub fn posted(&self) -> u64 {
        self.shared.posted.load(Ordering::Relaxed)
    }

    /// Whether either thread is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        [&self.writer, &self.reader]
            .into_iter()
            .flatten()
            .any(|handle| !handle.is_finished())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connection.is_connected()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Drops the current link. The writer reconnects after one period.
    ///
    /// Returns `false` if there was no link to drop.
    pub fn on_close_connection(&self) -> bool {
        self.shared.connection.close()
    }

    /// Takes everything in the mailbox, oldest first.
    ///
    /// Packets are filed in arrival order, so mail from an earlier packet
    /// always precedes mail from a later one.
    #[must_use]
    pub fn fetch(&self) -> Vec<Message> {
        self.shared.mailbox.drain_all().into_iter().collect()
    }

    /// Like [`fetch`](Self::fetch), but waits up to `timeout` for mail.
    #[must_use]
    pub fn fetch_timeout(&self, timeout: Timeout) -> Vec<Message> {
        self.shared.mailbox.wait_for_push(timeout);
        self.fetch()
    }

    #[must_use]
    pub fn has_mail(&self) -> bool {
        !self.shared.mailbox.is_empty()
    }

    #[must_use]
    pub fn pending_mail(&self) -> usize {
        self.shared.mailbox.len()
    }

    /// Times the mailbox overflowed and was discarded.
    #[must_use]
    pub fn overflow_purges(&self) -> u64 {
        self.shared.mailbox.side(|inbound| inbound.purges)
    }

    /// Installs the mail hook, replacing any previous one.
    pub fn set_mail_hook(&self, hook: impl MailHook) {
        *self.shared.hook.write() = Some(Arc::new(hook));
    }

    pub fn clear_mail_hook(&self) {
        *self.shared.hook.write() = None;
    }

    /// Broker clock minus local clock, in seconds.
    #[must_use]
    pub fn skew(&self) -> f64 {
        self.shared.mailbox.side(|inbound| inbound.skew.estimate())
    }

    #[must_use]
    pub fn remote_to_local(&self, remote: Timestamp) -> Timestamp {
        self.shared.mailbox.side(|inbound| inbound.skew.remote_to_local(remote))
    }

    #[must_use]
    pub fn local_to_remote(&self, local: Timestamp) -> Timestamp {
        self.shared.mailbox.side(|inbound| inbound.skew.local_to_remote(local))
    }

    /// Current local time on the client's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }

    /// Stops both threads and waits for them to exit.
    pub fn shutdown(mut self) {
        if !self.shared.config.quiet {
            info!(name = %self.shared.config.name, "client shutdown initiated");
        }
        self.shared.request_quit();
        // Unblocks a reader parked in recv.
        self.shared.connection.close();

        if let Some(handle) = self.writer.take() {
            debug!("waiting for writer thread to exit");
            let _ = handle.join();
        }
        if let Some(handle) = self.reader.take() {
            debug!("waiting for reader thread to exit");
            let _ = handle.join();
        }
    }
}

impl<C: Connector> Drop for Client<C> {
    fn drop(&mut self) {
        self.shared.request_quit();
        self.shared.connection.close();
    }
}

impl<C: Connector> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.shared.config.name)
            .field("id", &self.shared.hello.id)
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}
