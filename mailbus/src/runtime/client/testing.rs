//! In-memory connector and link doubles for pump tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::control::types::{ClientHello, ConnectError};
use crate::data::message::Message;
use crate::data::packet::PacketCodec;
use crate::net::endpoint::BrokerAddress;
use crate::net::link::{Connector, Link, LinkError};
use crate::sync::queue::{MessageQueue, Timeout};

/// Polls `cond` until it holds or `limit` passes.
pub(crate) fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Broker end shared by every link a [`ScriptedConnector`] hands out.
#[derive(Default)]
pub(crate) struct ScriptedBroker {
    attempts: Mutex<Vec<Instant>>,
    sent: Mutex<Vec<Vec<u8>>>,
    inbound: MessageQueue<Vec<u8>>,
    fail_next_send: AtomicBool,
    links: Mutex<Vec<Arc<AtomicBool>>>,
}

impl ScriptedBroker {
    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    pub(crate) fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Every message in every frame sent so far, in order.
    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        let codec = PacketCodec::default();
        self.sent_frames()
            .iter()
            .flat_map(|frame| codec.decode(frame).unwrap_or_default())
            .collect()
    }

    /// Queues a frame for the client's reader.
    pub(crate) fn deliver(&self, frame: Vec<u8>) {
        self.inbound.push(frame);
    }

    pub(crate) fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Marks every link handed out so far as dead.
    pub(crate) fn kill_links(&self) {
        for open in self.links.lock().iter() {
            open.store(false, Ordering::SeqCst);
        }
    }
}

pub(crate) struct ScriptedLink {
    broker: Arc<ScriptedBroker>,
    open: Arc<AtomicBool>,
}

impl Link for ScriptedLink {
    fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        if self.broker.fail_next_send.swap(false, Ordering::SeqCst) {
            self.open.store(false, Ordering::SeqCst);
            return Err(LinkError::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        self.broker.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn recv(&self) -> Result<Vec<u8>, LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        self.broker
            .inbound
            .wait_for_push(Timeout::Duration(Duration::from_millis(10)));
        self.broker
            .inbound
            .with_locked(|frames, _| frames.pop_front())
            .ok_or(LinkError::Idle)
    }

    fn shutdown(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Connector replaying a script of connect outcomes, then succeeding.
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<ConnectError>>,
    broker: Arc<ScriptedBroker>,
}

impl ScriptedConnector {
    pub(crate) fn healthy() -> Self {
        Self::with_failures(Vec::new())
    }

    pub(crate) fn failing_transiently(times: usize) -> Self {
        Self::with_failures((0..times).map(|_| ConnectError::Timeout).collect())
    }

    pub(crate) fn rejecting() -> Self {
        Self::with_failures(vec![ConnectError::Rejected("not welcome".into())])
    }

    fn with_failures(failures: Vec<ConnectError>) -> Self {
        Self {
            script: Mutex::new(failures.into()),
            broker: Arc::default(),
        }
    }

    pub(crate) fn broker(&self) -> Arc<ScriptedBroker> {
        Arc::clone(&self.broker)
    }
}

impl Connector for ScriptedConnector {
    type Link = ScriptedLink;

    fn connect(
        &self,
        _address: &BrokerAddress,
        hello: &ClientHello,
    ) -> Result<ScriptedLink, ConnectError> {
        assert_eq!(hello.token, crate::control::types::HANDSHAKE_KEY);
        self.broker.attempts.lock().push(Instant::now());
        if let Some(failure) = self.script.lock().pop_front() {
            return Err(failure);
        }
        let open = Arc::new(AtomicBool::new(true));
        self.broker.links.lock().push(Arc::clone(&open));
        Ok(ScriptedLink {
            broker: Arc::clone(&self.broker),
            open,
        })
    }
}
