//! Connection state shared by the writer and reader pumps.
//!
//! The writer is the only thread that installs a link. Teardown may come from
//! the writer (send failure, shutdown) or the application
//! ([`Client::on_close_connection`](super::Client::on_close_connection));
//! both go through [`Connection::close`], which is serialised by its own lock
//! and finds an empty slot the second time round.
//!
//! The reader never owns the link. It clones the handle for one receive, and
//! a link torn down under it answers with an error rather than faulting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::net::link::Link;

/// Where the session to the broker stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// Link slot, state flag and close lock.
pub struct Connection<L> {
    state: AtomicU8,
    link: RwLock<Option<Arc<L>>>,
    close_lock: Mutex<()>,
}

impl<L: Link> Connection<L> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            link: RwLock::new(None),
            close_lock: Mutex::new(()),
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Disconnected → Connecting.
    pub(crate) fn begin_connect(&self) {
        let _guard = self.close_lock.lock();
        self.set_state(ConnectionState::Connecting);
    }

    /// Connecting → Disconnected after a failed attempt.
    pub(crate) fn abort_connect(&self) {
        let _guard = self.close_lock.lock();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Connecting → Connected. Returns the writer's handle on the new link.
    pub(crate) fn install(&self, link: L) -> Arc<L> {
        let link = Arc::new(link);
        let _guard = self.close_lock.lock();
        *self.link.write() = Some(Arc::clone(&link));
        self.set_state(ConnectionState::Connected);
        link
    }

    /// Borrows the live link, if any, for one operation.
    #[must_use]
    pub fn link(&self) -> Option<Arc<L>> {
        self.link.read().clone()
    }

    /// Tears the current link down.
    ///
    /// Returns `false` if there was nothing to close.
    pub fn close(&self) -> bool {
        let _guard = self.close_lock.lock();
        let link = self.link.write().take();
        self.set_state(ConnectionState::Disconnected);
        match link {
            Some(link) => {
                link.shutdown();
                true
            }
            None => false,
        }
    }
}

impl<L: Link> Default for Connection<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> std::fmt::Debug for Connection<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field(
                "state",
                &ConnectionState::from_u8(self.state.load(Ordering::Relaxed)),
            )
            .finish_non_exhaustive()
    }
}
